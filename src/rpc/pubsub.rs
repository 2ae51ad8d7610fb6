//! Websocket signature subscriptions
//!
//! `signatureSubscribe` pushes a single notification once the transaction
//! reaches the subscribed commitment, after which the node drops the
//! subscription. [`SignatureSubscription::into_stream`] adapts that into the
//! `Stream` of [`SignatureStatus`] the confirmation coordinator consumes.

use futures::stream::{self, Stream};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::rpc_errors::RpcError;
use super::{Commitment, SignatureStatus};
use crate::types::Signature;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const SUBSCRIBE_REQUEST_ID: u64 = 1;

/// Websocket endpoint handle; each subscription owns its own connection
#[derive(Debug, Clone)]
pub struct PubsubClient {
    ws_url: String,
}

impl PubsubClient {
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.ws_url
    }

    /// Subscribe to a transaction reaching `commitment`
    pub async fn signature_subscribe(
        &self,
        signature: &Signature,
        commitment: Commitment,
    ) -> Result<SignatureSubscription, RpcError> {
        info!(endpoint = %self.ws_url, signature = %signature, "Subscribing to signature");

        let (mut socket, _) = connect_async(self.ws_url.as_str())
            .await
            .map_err(|e| self.transport_error(e))?;

        let request = json!({
            "jsonrpc": "2.0",
            "id": SUBSCRIBE_REQUEST_ID,
            "method": "signatureSubscribe",
            "params": [
                signature.to_string(),
                {"commitment": commitment.as_str(), "enableReceivedNotification": false}
            ]
        });
        socket
            .send(Message::Text(request.to_string()))
            .await
            .map_err(|e| self.transport_error(e))?;

        let subscription_id = loop {
            match socket.next().await {
                Some(Ok(Message::Text(text))) => {
                    if let Some(id) = parse_subscribe_reply(&text)? {
                        break id;
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    return Err(RpcError::SubscriptionClosed(
                        "socket closed before subscription was confirmed".to_string(),
                    ))
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(self.transport_error(e)),
            }
        };
        debug!(subscription_id, "Signature subscription established");

        Ok(SignatureSubscription {
            socket,
            endpoint: self.ws_url.clone(),
            subscription_id,
            commitment,
            done: false,
        })
    }

    fn transport_error(&self, err: impl std::fmt::Display) -> RpcError {
        RpcError::Transport {
            endpoint: self.ws_url.clone(),
            message: err.to_string(),
        }
    }
}

/// A live `signatureSubscribe` subscription
///
/// Dropping it closes the connection, which also ends the subscription on
/// the node; [`SignatureSubscription::unsubscribe`] does so explicitly.
pub struct SignatureSubscription {
    socket: WsStream,
    endpoint: String,
    subscription_id: u64,
    commitment: Commitment,
    done: bool,
}

impl std::fmt::Debug for SignatureSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureSubscription")
            .field("endpoint", &self.endpoint)
            .field("subscription_id", &self.subscription_id)
            .field("commitment", &self.commitment)
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

impl SignatureSubscription {
    pub fn subscription_id(&self) -> u64 {
        self.subscription_id
    }

    /// Wait for the next notification; `None` after the final one
    pub async fn next_status(&mut self) -> Option<Result<SignatureStatus, RpcError>> {
        if self.done {
            return None;
        }
        loop {
            let message = match self.socket.next().await {
                Some(Ok(message)) => message,
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(RpcError::Transport {
                        endpoint: self.endpoint.clone(),
                        message: e.to_string(),
                    }));
                }
                None => {
                    self.done = true;
                    return Some(Err(RpcError::SubscriptionClosed(
                        "socket closed".to_string(),
                    )));
                }
            };

            match message {
                Message::Text(text) => {
                    match parse_signature_notification(&text, self.subscription_id, self.commitment) {
                        Ok(Some(status)) => {
                            // the node auto-cancels after the first real notification
                            self.done = true;
                            return Some(Ok(status));
                        }
                        Ok(None) => continue,
                        Err(e) => {
                            self.done = true;
                            return Some(Err(e));
                        }
                    }
                }
                Message::Close(_) => {
                    self.done = true;
                    return Some(Err(RpcError::SubscriptionClosed(
                        "server closed the subscription".to_string(),
                    )));
                }
                _ => continue,
            }
        }
    }

    /// Adapt into a `Stream` for the confirmation coordinator
    pub fn into_stream(self) -> impl Stream<Item = Result<SignatureStatus, RpcError>> + Send {
        stream::unfold(self, |mut sub| async move {
            sub.next_status().await.map(|item| (item, sub))
        })
    }

    /// Cancel on the node and close the connection
    pub async fn unsubscribe(mut self) -> Result<(), RpcError> {
        let request = json!({
            "jsonrpc": "2.0",
            "id": SUBSCRIBE_REQUEST_ID + 1,
            "method": "signatureUnsubscribe",
            "params": [self.subscription_id]
        });
        if !self.done {
            if let Err(e) = self.socket.send(Message::Text(request.to_string())).await {
                warn!(subscription_id = self.subscription_id, error = %e, "Unable to unsubscribe");
            }
        }
        self.socket.close(None).await.map_err(|e| RpcError::Transport {
            endpoint: self.endpoint.clone(),
            message: e.to_string(),
        })
    }
}

/// Extract the subscription id from the reply to our subscribe request
///
/// Messages that are not that reply yield `Ok(None)`.
pub(crate) fn parse_subscribe_reply(text: &str) -> Result<Option<u64>, RpcError> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| RpcError::InvalidResponse(format!("subscribe reply: {}", e)))?;

    if value.get("id").and_then(Value::as_u64) != Some(SUBSCRIBE_REQUEST_ID) {
        return Ok(None);
    }
    if let Some(err) = value.get("error") {
        let code = err.get("code").and_then(Value::as_i64).unwrap_or_default();
        let message = err.get("message").and_then(Value::as_str).unwrap_or("unknown error");
        return Err(RpcError::from_rpc_error(code, message));
    }
    value
        .get("result")
        .and_then(Value::as_u64)
        .map(Some)
        .ok_or_else(|| RpcError::InvalidResponse(format!("unexpected subscribe reply: {}", text)))
}

/// Turn a `signatureNotification` into a status observation
///
/// Returns `Ok(None)` for messages that belong to other subscriptions and
/// for `receivedSignature` notices.
pub(crate) fn parse_signature_notification(
    text: &str,
    subscription_id: u64,
    commitment: Commitment,
) -> Result<Option<SignatureStatus>, RpcError> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| RpcError::InvalidResponse(format!("notification: {}", e)))?;

    if value.get("method").and_then(Value::as_str) != Some("signatureNotification") {
        return Ok(None);
    }
    let params = value
        .get("params")
        .ok_or_else(|| RpcError::InvalidResponse("notification without params".to_string()))?;
    if params.get("subscription").and_then(Value::as_u64) != Some(subscription_id) {
        return Ok(None);
    }

    let result = params
        .get("result")
        .ok_or_else(|| RpcError::InvalidResponse("notification without result".to_string()))?;
    let slot = result
        .pointer("/context/slot")
        .and_then(Value::as_u64)
        .unwrap_or_default();
    let payload = result
        .get("value")
        .ok_or_else(|| RpcError::InvalidResponse("notification without value".to_string()))?;

    // "receivedSignature" is a bare string
    let Some(object) = payload.as_object() else {
        return Ok(None);
    };
    let err = object
        .get("err")
        .filter(|e| !e.is_null())
        .map(|e| e.to_string());

    Ok(Some(SignatureStatus {
        slot,
        confirmations: None,
        err,
        confirmation_status: Some(commitment),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_subscribe_reply() {
        assert_eq!(
            parse_subscribe_reply(r#"{"jsonrpc":"2.0","result":23784,"id":1}"#).unwrap(),
            Some(23784)
        );
        assert_eq!(
            parse_subscribe_reply(r#"{"jsonrpc":"2.0","result":true,"id":7}"#).unwrap(),
            None
        );
        assert!(parse_subscribe_reply(
            r#"{"jsonrpc":"2.0","error":{"code":-32602,"message":"Invalid params"},"id":1}"#
        )
        .is_err());
    }

    #[test]
    fn test_parse_notification_success() {
        let text = r#"{"jsonrpc":"2.0","method":"signatureNotification","params":{"result":{"context":{"slot":5207624},"value":{"err":null}},"subscription":24006}}"#;
        let status = parse_signature_notification(text, 24006, Commitment::Confirmed)
            .unwrap()
            .unwrap();
        assert_eq!(status.slot, 5207624);
        assert_eq!(status.err, None);
        assert_eq!(status.commitment(), Commitment::Confirmed);
    }

    #[test]
    fn test_parse_notification_error_and_filters() {
        let failed = r#"{"jsonrpc":"2.0","method":"signatureNotification","params":{"result":{"context":{"slot":9},"value":{"err":{"InstructionError":[0,"InvalidArgument"]}}},"subscription":3}}"#;
        let status = parse_signature_notification(failed, 3, Commitment::Finalized)
            .unwrap()
            .unwrap();
        assert_eq!(
            status.err.as_deref(),
            Some(r#"{"InstructionError":[0,"InvalidArgument"]}"#)
        );

        // another subscription
        assert!(parse_signature_notification(failed, 4, Commitment::Finalized)
            .unwrap()
            .is_none());

        let received = r#"{"jsonrpc":"2.0","method":"signatureNotification","params":{"result":{"context":{"slot":9},"value":"receivedSignature"},"subscription":3}}"#;
        assert!(parse_signature_notification(received, 3, Commitment::Finalized)
            .unwrap()
            .is_none());
    }
}
