//! Kubernetes port-forward（`v4.channel.k8s.io`）
//!
//! 每个 websocket 二进制帧的首字节是通道号：0 为数据，1 为错误。
//! 每个通道的第一帧是 2 字节小端端口号，之后才是有效载荷。
//! 对外暴露为一个 `DuplexStream`

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;

use crate::application::ports::ClusterError;

pub const PORT_FORWARD_PROTOCOL: &str = "v4.channel.k8s.io";

const DATA_CHANNEL: u8 = 0;
const ERROR_CHANNEL: u8 = 1;

/// 单个帧的解码结果
#[derive(Debug, PartialEq, Eq)]
pub enum FrameAction<'a> {
    /// 写入本地
    Data(&'a [u8]),
    /// 端口头或空帧
    Skip,
    /// 服务端报告错误
    Error(String),
}

/// 通道状态：记录每个通道的端口头是否已收到
#[derive(Debug, Default)]
pub struct FrameDecoder {
    data_header_seen: bool,
    error_header_seen: bool,
}

impl FrameDecoder {
    pub fn decode<'a>(&mut self, frame: &'a [u8]) -> FrameAction<'a> {
        let Some((&channel, payload)) = frame.split_first() else {
            return FrameAction::Skip;
        };
        match channel {
            DATA_CHANNEL => {
                if !self.data_header_seen {
                    self.data_header_seen = true;
                    return match payload.get(2..) {
                        Some(rest) if !rest.is_empty() => FrameAction::Data(rest),
                        _ => FrameAction::Skip,
                    };
                }
                if payload.is_empty() {
                    FrameAction::Skip
                } else {
                    FrameAction::Data(payload)
                }
            }
            ERROR_CHANNEL => {
                let payload = if self.error_header_seen {
                    payload
                } else {
                    self.error_header_seen = true;
                    payload.get(2..).unwrap_or_default()
                };
                if payload.is_empty() {
                    FrameAction::Skip
                } else {
                    FrameAction::Error(String::from_utf8_lossy(payload).to_string())
                }
            }
            _ => FrameAction::Skip,
        }
    }
}

/// 把 http(s) API 地址转换成 port-forward 的 ws(s) 地址
pub fn port_forward_url(api_url: &str, namespace: &str, pod: &str, port: u16) -> String {
    let base = api_url.trim_end_matches('/');
    let ws_base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        base.to_string()
    };
    format!(
        "{}/api/v1/namespaces/{}/pods/{}/portforward?ports={}",
        ws_base, namespace, pod, port
    )
}

/// 打开 port-forward websocket 并桥接到 `DuplexStream`
pub async fn open(url: &str, token: Option<&str>) -> Result<DuplexStream, ClusterError> {
    let mut request = url
        .into_client_request()
        .map_err(|e| ClusterError::PortForward(e.to_string()))?;
    let headers = request.headers_mut();
    headers.insert(
        "Sec-WebSocket-Protocol",
        HeaderValue::from_static(PORT_FORWARD_PROTOCOL),
    );
    if let Some(token) = token {
        let value = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|e| ClusterError::PortForward(e.to_string()))?;
        headers.insert("Authorization", value);
    }

    let (ws, _) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(|e| ClusterError::PortForward(e.to_string()))?;
    tracing::debug!(url = %url, "Port-forward websocket connected");

    let (local, remote) = tokio::io::duplex(64 * 1024);
    tokio::spawn(async move {
        let (mut sink, mut stream) = ws.split();
        let (mut reader, mut writer) = tokio::io::split(remote);
        let mut decoder = FrameDecoder::default();
        let mut buf = vec![0u8; 32 * 1024];

        loop {
            tokio::select! {
                message = stream.next() => match message {
                    Some(Ok(Message::Binary(frame))) => match decoder.decode(&frame) {
                        FrameAction::Data(data) => {
                            if writer.write_all(data).await.is_err() {
                                break;
                            }
                        }
                        FrameAction::Skip => {}
                        FrameAction::Error(message) => {
                            tracing::warn!(error = %message, "Port-forward error from cluster");
                            break;
                        }
                    },
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!(error = %e, "Port-forward websocket failed");
                        break;
                    }
                },
                read = reader.read(&mut buf) => match read {
                    Ok(0) | Err(_) => {
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                    Ok(n) => {
                        let mut frame = Vec::with_capacity(n + 1);
                        frame.push(DATA_CHANNEL);
                        frame.extend_from_slice(&buf[..n]);
                        if sink.send(Message::Binary(frame)).await.is_err() {
                            break;
                        }
                    }
                },
            }
        }
        let _ = writer.shutdown().await;
    });

    Ok(local)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decoder_skips_port_headers() {
        let mut decoder = FrameDecoder::default();
        // 端口 8000 = 0x1f40
        assert_eq!(decoder.decode(&[0, 0x40, 0x1f]), FrameAction::Skip);
        assert_eq!(decoder.decode(&[1, 0x40, 0x1f]), FrameAction::Skip);
        assert_eq!(decoder.decode(&[0, b'h', b'i']), FrameAction::Data(b"hi"));
        assert_eq!(decoder.decode(&[0]), FrameAction::Skip);
        assert_eq!(
            decoder.decode(&[1, b'b', b'a', b'd']),
            FrameAction::Error("bad".to_string())
        );
        assert_eq!(decoder.decode(&[]), FrameAction::Skip);
    }

    #[test]
    fn test_header_with_trailing_data() {
        let mut decoder = FrameDecoder::default();
        assert_eq!(decoder.decode(&[0, 0x40, 0x1f, b'x']), FrameAction::Data(b"x"));
    }

    #[test]
    fn test_port_forward_url() {
        assert_eq!(
            port_forward_url("https://10.0.0.1:6443/", "ai", "llama-0", 8000),
            "wss://10.0.0.1:6443/api/v1/namespaces/ai/pods/llama-0/portforward?ports=8000"
        );
        assert!(port_forward_url("http://localhost:8001", "default", "p", 1).starts_with("ws://"));
    }
}
