//! TCP transport: inbound listener, file transfer and chat sessions

pub mod chat;
pub mod server;
pub mod transfer;

use std::future::Future;

use tokio_util::sync::CancellationToken;

use crate::types::{ShareError, ShareResult};

pub use chat::{ChatEvent, ChatOffer, ChatSender, ChatSession};
pub use server::{InboundRequest, PeerServer};
pub use transfer::{send_file, FileOffer, TransferSession, TransferState};

/// Run `fut` unless `cancel` fires first
pub(crate) async fn cancellable<F, T>(cancel: &CancellationToken, fut: F) -> ShareResult<T>
where
    F: Future<Output = ShareResult<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ShareError::Cancelled),
        result = fut => result,
    }
}
