//! HttpTransport against a mock JSON-RPC node

use std::sync::Arc;

use base64::Engine as _;
use mockito::{Matcher, Server};
use serde_json::json;
use soltx::rpc::HttpTransport;
use soltx::{
    AccountMeta, Commitment, ConfirmParams, ConfirmationCoordinator, ConfirmationStatus, Hash,
    Instruction, Keypair, Message, NeverExpires, Pubkey, RpcError, RpcTransport, SendOptions,
    Signature, Signer, Transaction,
};
use tokio_util::sync::CancellationToken;

fn signed_wire() -> (Signature, Vec<u8>) {
    let payer = Keypair::from_seed(&[21; 32]);
    let ix = Instruction::new_with_bytes(
        Pubkey::new_from_array([0; 32]),
        &[2, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0],
        vec![
            AccountMeta::new(payer.pubkey(), true),
            AccountMeta::new(Pubkey::new_from_array([9; 32]), false),
        ],
    );
    let message = Message::new_with_blockhash(&[ix], &payer.pubkey(), &Hash::new_from_array([1; 32])).unwrap();
    let tx = Transaction::new_signed(message, &[&payer]).unwrap();
    (tx.signatures[0], tx.serialize().unwrap())
}

fn rpc_result(result: serde_json::Value) -> String {
    json!({"jsonrpc": "2.0", "id": 1, "result": result}).to_string()
}

fn rpc_error(code: i64, message: &str) -> String {
    json!({"jsonrpc": "2.0", "id": 1, "error": {"code": code, "message": message}}).to_string()
}

#[tokio::test]
async fn test_send_transaction_base64() {
    let mut server = Server::new_async().await;
    let (sig, wire) = signed_wire();
    let encoded = base64::engine::general_purpose::STANDARD.encode(&wire);

    let mock = server
        .mock("POST", "/")
        .match_body(Matcher::PartialJson(json!({
            "jsonrpc": "2.0",
            "method": "sendTransaction",
            "params": [encoded, {"encoding": "base64", "skipPreflight": false}],
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(rpc_result(json!(sig.to_string())))
        .create_async()
        .await;

    let transport = HttpTransport::new(server.url()).unwrap();
    let returned = transport
        .send_transaction(&wire, &SendOptions::default())
        .await
        .unwrap();
    assert_eq!(returned, sig);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_signature_statuses() {
    let mut server = Server::new_async().await;
    let (known, _) = signed_wire();
    let unknown = Signature::new_from_array([7; 64]);

    let mock = server
        .mock("POST", "/")
        .match_body(Matcher::PartialJson(json!({
            "method": "getSignatureStatuses",
            "params": [[known.to_string(), unknown.to_string()], {"searchTransactionHistory": false}],
        })))
        .with_status(200)
        .with_body(rpc_result(json!({
            "context": {"slot": 82},
            "value": [
                {"slot": 72, "confirmations": 10, "err": null, "status": {"Ok": null}, "confirmationStatus": "confirmed"},
                null
            ]
        })))
        .create_async()
        .await;

    let transport = HttpTransport::new(server.url()).unwrap();
    let statuses = transport.get_signature_statuses(&[known, unknown]).await.unwrap();
    assert_eq!(statuses.len(), 2);

    let first = statuses[0].as_ref().unwrap();
    assert_eq!(first.slot, 72);
    assert_eq!(first.confirmations, Some(10));
    assert_eq!(first.err, None);
    assert_eq!(first.commitment(), Commitment::Confirmed);
    assert!(statuses[1].is_none());
    mock.assert_async().await;
}

#[tokio::test]
async fn test_status_count_mismatch_is_invalid() {
    let mut server = Server::new_async().await;
    let (sig, _) = signed_wire();
    server
        .mock("POST", "/")
        .with_status(200)
        .with_body(rpc_result(json!({"context": {"slot": 1}, "value": []})))
        .create_async()
        .await;

    let transport = HttpTransport::new(server.url()).unwrap();
    let err = transport.get_signature_statuses(&[sig]).await.unwrap_err();
    assert!(matches!(err, RpcError::InvalidResponse(_)));
}

#[tokio::test]
async fn test_latest_blockhash_and_height() {
    let mut server = Server::new_async().await;
    let blockhash = Hash::new_from_array([5; 32]);

    server
        .mock("POST", "/")
        .match_body(Matcher::PartialJson(json!({
            "method": "getLatestBlockhash",
            "params": [{"commitment": "finalized"}],
        })))
        .with_status(200)
        .with_body(rpc_result(json!({
            "context": {"slot": 2792},
            "value": {"blockhash": blockhash.to_string(), "lastValidBlockHeight": 3090}
        })))
        .create_async()
        .await;
    server
        .mock("POST", "/")
        .match_body(Matcher::PartialJson(json!({"method": "getBlockHeight"})))
        .with_status(200)
        .with_body(rpc_result(json!(1233)))
        .create_async()
        .await;

    let transport = HttpTransport::new(server.url()).unwrap();
    let latest = transport.get_latest_blockhash(Commitment::Finalized).await.unwrap();
    assert_eq!(latest.blockhash, blockhash);
    assert_eq!(latest.last_valid_block_height, 3090);
    assert_eq!(transport.get_block_height(Commitment::Confirmed).await.unwrap(), 1233);
}

#[tokio::test]
async fn test_rate_limited() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/")
        .with_status(429)
        .create_async()
        .await;

    let transport = HttpTransport::new(server.url()).unwrap();
    let err = transport.get_block_height(Commitment::Confirmed).await.unwrap_err();
    assert!(matches!(err, RpcError::RateLimited { .. }));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_server_error_is_transient() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/")
        .with_status(503)
        .create_async()
        .await;

    let transport = HttpTransport::new(server.url()).unwrap();
    let err = transport.get_block_height(Commitment::Confirmed).await.unwrap_err();
    assert!(matches!(err, RpcError::Transport { .. }));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_error_objects_are_classified() {
    let mut server = Server::new_async().await;
    let (_, wire) = signed_wire();
    let transport = HttpTransport::new(server.url()).unwrap();

    let unknown_blockhash = server
        .mock("POST", "/")
        .with_status(200)
        .with_body(rpc_error(-32002, "Transaction simulation failed: Blockhash not found"))
        .create_async()
        .await;
    let err = transport
        .send_transaction(&wire, &SendOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err, RpcError::BlockhashNotFound);
    unknown_blockhash.remove_async().await;

    server
        .mock("POST", "/")
        .with_status(200)
        .with_body(rpc_error(
            -32002,
            "Transaction simulation failed: Attempt to debit an account but found no record of a prior credit.",
        ))
        .create_async()
        .await;
    let err = transport
        .send_transaction(&wire, &SendOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::TransactionRejected { .. }));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_connection_refused_is_transport_error() {
    let transport = HttpTransport::new("http://127.0.0.1:1").unwrap();
    let err = transport.get_block_height(Commitment::Confirmed).await.unwrap_err();
    assert!(matches!(err, RpcError::Transport { .. } | RpcError::Timeout { .. }));
}

#[tokio::test]
async fn test_submit_and_confirm_over_http() {
    let mut server = Server::new_async().await;
    let (sig, wire) = signed_wire();

    server
        .mock("POST", "/")
        .match_body(Matcher::PartialJson(json!({"method": "sendTransaction"})))
        .with_status(200)
        .with_body(rpc_result(json!(sig.to_string())))
        .expect(1)
        .create_async()
        .await;
    server
        .mock("POST", "/")
        .match_body(Matcher::PartialJson(json!({"method": "getSignatureStatuses"})))
        .with_status(200)
        .with_body(rpc_result(json!({
            "context": {"slot": 100},
            "value": [{"slot": 99, "confirmations": null, "err": null, "confirmationStatus": "finalized"}]
        })))
        .create_async()
        .await;

    let transport: Arc<dyn RpcTransport> = Arc::new(HttpTransport::new(server.url()).unwrap());
    let coordinator = ConfirmationCoordinator::new(transport);
    let done = coordinator
        .submit_and_confirm(
            &wire,
            &SendOptions::default(),
            &ConfirmParams::default(),
            &NeverExpires,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(done.signature, sig);
    assert_eq!(done.status, ConfirmationStatus::Finalized);
    assert_eq!(done.slot, Some(99));
}
