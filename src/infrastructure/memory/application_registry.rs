//! In-Memory Application Registry
//!
//! 以 (recipe, model) 为键的运行中应用索引，每个键最多一条

use dashmap::DashMap;
use std::sync::Arc;

use crate::domain::{AppKey, ApplicationState, PodHealth};

/// 内存应用索引
pub struct ApplicationRegistry {
    applications: DashMap<AppKey, ApplicationState>,
}

impl ApplicationRegistry {
    pub fn new() -> Self {
        Self {
            applications: DashMap::new(),
        }
    }

    pub fn arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn get(&self, key: &AppKey) -> Option<ApplicationState> {
        self.applications.get(key).map(|s| s.clone())
    }

    pub fn has(&self, key: &AppKey) -> bool {
        self.applications.contains_key(key)
    }

    /// 插入或替换，返回旧值
    pub fn set(&self, state: ApplicationState) -> Option<ApplicationState> {
        self.applications.insert(state.key(), state)
    }

    /// 原地更新已有条目的 Pod 状态与健康；条目不存在或已换成其他 Pod 时不写入。
    /// 返回是否发生了变化
    pub fn update_status(
        &self,
        key: &AppKey,
        pod_id: &str,
        pod_status: &str,
        health: PodHealth,
    ) -> bool {
        let Some(mut state) = self.applications.get_mut(key) else {
            return false;
        };
        if state.pod_id != pod_id || (state.pod_status == pod_status && state.health == health) {
            return false;
        }
        state.pod_status = pod_status.to_string();
        state.health = health;
        true
    }

    pub fn delete(&self, key: &AppKey) -> Option<ApplicationState> {
        self.applications.remove(key).map(|(_, state)| state)
    }

    /// 按 Pod ID 查找
    pub fn find_by_pod_id(&self, pod_id: &str) -> Option<ApplicationState> {
        self.applications
            .iter()
            .find(|entry| entry.pod_id == pod_id)
            .map(|entry| entry.clone())
    }

    pub fn values(&self) -> Vec<ApplicationState> {
        let mut values: Vec<ApplicationState> =
            self.applications.iter().map(|e| e.clone()).collect();
        values.sort_by(|a, b| a.key().to_string().cmp(&b.key().to_string()));
        values
    }

    pub fn keys(&self) -> Vec<AppKey> {
        self.applications.iter().map(|e| e.key().clone()).collect()
    }

    pub fn clear(&self) {
        self.applications.clear();
    }

    pub fn len(&self) -> usize {
        self.applications.len()
    }

    pub fn is_empty(&self) -> bool {
        self.applications.is_empty()
    }
}

impl Default for ApplicationRegistry {
    fn default() -> Self {
        Self::new()
    }
}
