//! 本地空闲端口分配

use std::collections::HashSet;
use std::io;
use tokio::net::TcpListener;

/// 由操作系统分配一个空闲端口，跳过 `reserved` 中已分配给本次操作的端口
pub async fn get_free_port(reserved: &HashSet<u16>) -> io::Result<u16> {
    for _ in 0..16 {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
        let port = listener.local_addr()?.port();
        if !reserved.contains(&port) {
            return Ok(port);
        }
    }
    Err(io::Error::new(
        io::ErrorKind::AddrInUse,
        "no free local port available",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_free_port_skips_reserved() {
        let mut reserved = HashSet::new();
        for _ in 0..3 {
            let port = get_free_port(&reserved).await.unwrap();
            assert!(port > 0);
            assert!(reserved.insert(port));
        }
    }
}
