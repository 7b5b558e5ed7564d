//! 应用 Pod 的容器装配
//!
//! 根据构建出的镜像、模型文件和已分配的端口，生成 Pod 与各容器的创建参数

use std::path::Path;

use crate::application::ports::{
    ContainerCreateOptions, EngineConnection, HealthCheck, MountSpec, PodCreateOptions,
    PortMapping,
};
use crate::domain::labels::{app_labels, join_ports, LABEL_APP_PORTS, LABEL_MODEL_PORTS};
use crate::domain::{model_label, BuiltImage, Labels, ModelInfo, Recipe};

/// 装配输入
pub struct PodBlueprint<'a> {
    pub pod_name: String,
    pub recipe: &'a Recipe,
    pub images: &'a [BuiltImage],
    pub model: Option<&'a ModelInfo>,
    /// 模型在执行目标上的路径
    pub model_path: Option<&'a Path>,
    pub connection: &'a EngineConnection,
    /// 当前操作的标签，写到每个容器上
    pub labels: &'a Labels,
    /// 为每个容器端口分配好的本地端口
    pub port_mappings: &'a [PortMapping],
}

/// 装配结果
#[derive(Debug, Clone)]
pub struct PodPlan {
    pub pod: PodCreateOptions,
    pub containers: Vec<ContainerCreateOptions>,
    pub app_ports: Vec<u16>,
    pub model_ports: Vec<u16>,
}

fn host_ports(image: &BuiltImage, mappings: &[PortMapping]) -> Vec<u16> {
    image
        .ports
        .iter()
        .filter_map(|port| {
            mappings
                .iter()
                .find(|m| m.container_port == *port)
                .map(|m| m.host_port)
        })
        .collect()
}

impl PodBlueprint<'_> {
    pub fn plan(&self) -> PodPlan {
        let mut app_ports = Vec::new();
        let mut model_ports = Vec::new();
        for image in self.images {
            let ports = host_ports(image, self.port_mappings);
            if image.model_service {
                model_ports.extend(ports);
            } else {
                app_ports.extend(ports);
            }
        }

        let mut pod_labels = app_labels(&self.recipe.id, &model_label(self.model));
        pod_labels.insert(LABEL_MODEL_PORTS.to_string(), join_ports(&model_ports));
        pod_labels.insert(LABEL_APP_PORTS.to_string(), join_ports(&app_ports));

        let model_endpoint = self.model_endpoint();
        let containers = self
            .images
            .iter()
            .map(|image| self.container(image, model_endpoint.as_deref()))
            .collect();

        PodPlan {
            pod: PodCreateOptions {
                name: self.pod_name.clone(),
                labels: pod_labels,
                port_mappings: self.port_mappings.to_vec(),
            },
            containers,
            app_ports,
            model_ports,
        }
    }

    /// recipe 声明的外部推理服务优先，否则指向本 Pod 内模型服务的第一个端口
    fn model_endpoint(&self) -> Option<String> {
        if let Some(endpoint) = &self.recipe.model_endpoint {
            return Some(endpoint.clone());
        }
        self.images
            .iter()
            .find(|image| image.model_service)
            .and_then(|image| image.ports.first())
            .map(|port| format!("http://localhost:{}", port))
    }

    fn container(&self, image: &BuiltImage, model_endpoint: Option<&str>) -> ContainerCreateOptions {
        let mut env = Vec::new();
        let mut mounts = Vec::new();

        if image.model_service {
            if let Some(path) = self.model_path {
                let file_name = path
                    .file_name()
                    .map(|name| name.to_string_lossy().to_string())
                    .unwrap_or_default();
                let destination = format!("/{}", file_name);
                mounts.push(MountSpec {
                    source: path.to_path_buf(),
                    destination: destination.clone(),
                    read_only: true,
                    mode: self.connection.bind_mode().map(|m| m.to_string()),
                });
                env.push(("MODEL_PATH".to_string(), destination));
            }
            if let Some(model) = self.model {
                env.extend(model.properties_env());
            }
        } else if let Some(endpoint) = model_endpoint {
            env.push(("MODEL_ENDPOINT".to_string(), endpoint.to_string()));
        }

        ContainerCreateOptions {
            name: format!("{}-{}", self.pod_name, image.app_name),
            image: image.id.clone(),
            pod: None,
            env,
            labels: self.labels.clone(),
            mounts,
            port_mappings: vec![],
            health_check: image.ports.first().map(|port| HealthCheck::http(*port)),
            command: vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::VmType;
    use crate::domain::labels::{LABEL_MODEL_ID, LABEL_RECIPE_ID};
    use crate::domain::{InferenceType, ModelFile};
    use std::path::PathBuf;

    fn recipe(model_endpoint: Option<&str>) -> Recipe {
        Recipe {
            id: "chatbot".to_string(),
            name: "ChatBot".to_string(),
            repository: "https://example.com/recipes.git".to_string(),
            reference: None,
            base_path: None,
            components: vec![],
            model_endpoint: model_endpoint.map(|e| e.to_string()),
        }
    }

    fn images() -> Vec<BuiltImage> {
        vec![
            BuiltImage {
                id: "localhost/chatbot-model:latest".to_string(),
                app_name: "model".to_string(),
                model_service: true,
                ports: vec![8001],
            },
            BuiltImage {
                id: "localhost/chatbot-ui:latest".to_string(),
                app_name: "ui".to_string(),
                model_service: false,
                ports: vec![8501],
            },
            BuiltImage {
                id: "localhost/chatbot-worker:latest".to_string(),
                app_name: "worker".to_string(),
                model_service: false,
                ports: vec![],
            },
        ]
    }

    fn model() -> ModelInfo {
        let mut model = ModelInfo::new("granite", InferenceType::LlamaCpp);
        model.file = Some(ModelFile {
            path: PathBuf::from("/models/granite"),
            file: "granite.gguf".to_string(),
        });
        model
    }

    fn mappings() -> Vec<PortMapping> {
        vec![
            PortMapping {
                container_port: 8001,
                host_port: 40001,
            },
            PortMapping {
                container_port: 8501,
                host_port: 40002,
            },
        ]
    }

    #[test]
    fn test_plan_wires_model_and_app_containers() {
        let recipe = recipe(None);
        let images = images();
        let model = model();
        let path = PathBuf::from("/remote/granite.gguf");
        let connection = EngineConnection {
            id: "podman".to_string(),
            name: "Podman".to_string(),
            vm_type: VmType::AppleHv,
        };
        let labels = app_labels("chatbot", "granite");
        let mappings = mappings();

        let plan = PodBlueprint {
            pod_name: "chatbot-1".to_string(),
            recipe: &recipe,
            images: &images,
            model: Some(&model),
            model_path: Some(&path),
            connection: &connection,
            labels: &labels,
            port_mappings: &mappings,
        }
        .plan();

        assert_eq!(plan.model_ports, vec![40001]);
        assert_eq!(plan.app_ports, vec![40002]);
        assert_eq!(plan.pod.labels.get(LABEL_MODEL_PORTS).unwrap(), "40001");
        assert_eq!(plan.pod.labels.get(LABEL_APP_PORTS).unwrap(), "40002");
        assert_eq!(plan.pod.labels.get(LABEL_MODEL_ID).unwrap(), "granite");

        let model_container = &plan.containers[0];
        assert_eq!(model_container.mounts[0].destination, "/granite.gguf");
        assert_eq!(model_container.mounts[0].mode.as_deref(), Some("Z"));
        assert!(model_container.mounts[0].read_only);
        assert!(model_container
            .env
            .contains(&("MODEL_PATH".to_string(), "/granite.gguf".to_string())));
        assert!(model_container.health_check.is_some());

        let ui = &plan.containers[1];
        assert!(ui.mounts.is_empty());
        assert_eq!(
            ui.env,
            vec![(
                "MODEL_ENDPOINT".to_string(),
                "http://localhost:8001".to_string()
            )]
        );
        assert_eq!(ui.health_check.as_ref().unwrap().test[1], "curl -s localhost:8501 > /dev/null");

        // 没有端口的镜像不配置健康检查
        assert!(plan.containers[2].health_check.is_none());
    }

    #[test]
    fn test_external_endpoint_and_qemu_bind_mode() {
        let recipe = recipe(Some("http://inference.local:9000"));
        let images = images();
        let model = model();
        let path = PathBuf::from("/remote/granite.gguf");
        let connection = EngineConnection {
            id: "podman".to_string(),
            name: "Podman".to_string(),
            vm_type: VmType::Qemu,
        };
        let labels = Labels::new();
        let mappings = mappings();

        let plan = PodBlueprint {
            pod_name: "chatbot-2".to_string(),
            recipe: &recipe,
            images: &images,
            model: Some(&model),
            model_path: Some(&path),
            connection: &connection,
            labels: &labels,
            port_mappings: &mappings,
        }
        .plan();

        assert_eq!(plan.containers[0].mounts[0].mode, None);
        assert_eq!(
            plan.containers[1].env[0].1,
            "http://inference.local:9000".to_string()
        );
        assert_eq!(plan.pod.labels.get(LABEL_RECIPE_ID).unwrap(), "chatbot");
    }
}
