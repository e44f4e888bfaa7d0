use std::fmt::Debug;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::debug;

/// A request payload together with the channel its response goes to.
pub struct Request<P: Debug, R> {
    pub payload: P,
    pub reply_to: oneshot::Sender<R>,
}

impl<P: Debug, R> Debug for Request<P, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Request").field(&self.payload).finish()
    }
}

impl<P: Debug, R> Request<P, R> {
    pub fn new(payload: P) -> (oneshot::Receiver<R>, Self) {
        let (reply_to, rx) = oneshot::channel();
        (rx, Self { payload, reply_to })
    }

    /// Send the response. A requester that stopped waiting is not an error.
    pub fn respond(self, response: R) {
        if self.reply_to.send(response).is_err() {
            debug!("Requester of {:?} went away", self.payload);
        }
    }
}

#[derive(Error, Debug)]
pub enum CallError {
    #[error("Coordinator is not running")]
    Stopped,
    #[error("Coordinator dropped the request")]
    Dropped,
}

/// Send `payload` to the coordinator behind `sender` and wait for the response.
pub async fn call<P, R, E>(sender: &flume::Sender<E>, payload: P) -> Result<R, CallError>
where
    P: Debug,
    Request<P, R>: Into<E>,
{
    let (rx, request) = Request::new(payload);
    sender
        .send_async(request.into())
        .await
        .map_err(|_| CallError::Stopped)?;
    rx.await.map_err(|_| CallError::Dropped)
}

/// Implement `From<$type>` for the request enum variant `$variant`.
#[macro_export]
macro_rules! into_request {
    ($variant:ident, $type:ty, $enum:ident) => {
        impl From<$type> for $enum {
            fn from(value: $type) -> Self {
                $enum::$variant(value)
            }
        }
    };
}
