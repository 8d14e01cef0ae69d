//! Transport-independent control channel.

use crate::error::Result;
use crate::wire::{Request, Response};
use std::time::Duration;

/// Requesting side: send one command and wait, bounded, for its answer.
///
/// Never call from the audio thread.
pub trait ControlChannel {
    fn send(&mut self, request: &Request, timeout: Duration) -> Result<Response>;

    /// Short transport name for diagnostics.
    fn transport(&self) -> &'static str;

    /// Send and turn an `ERROR|...` answer into [`crate::ControlError::Remote`].
    fn call(&mut self, request: &Request, timeout: Duration) -> Result<String> {
        self.send(request, timeout)?.into_result()
    }
}

/// Answering side. Handlers run on a control thread, never the audio thread.
pub trait CommandHandler: Send + Sync {
    fn handle(&self, request: &Request) -> Response;
}

impl<F> CommandHandler for F
where
    F: Fn(&Request) -> Response + Send + Sync,
{
    fn handle(&self, request: &Request) -> Response {
        self(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Loopback<H: CommandHandler> {
        handler: H,
    }

    impl<H: CommandHandler> ControlChannel for Loopback<H> {
        fn send(&mut self, request: &Request, _timeout: Duration) -> Result<Response> {
            Ok(self.handler.handle(request))
        }

        fn transport(&self) -> &'static str {
            "loopback"
        }
    }

    #[test]
    fn test_closure_handler_and_call() {
        let mut channel = Loopback {
            handler: |request: &Request| match request {
                Request::Panic => Response::ok(),
                _ => Response::error("nope"),
            },
        };

        assert_eq!(
            channel.call(&Request::Panic, Duration::from_millis(1)).unwrap(),
            "OK"
        );
        assert!(channel
            .call(&Request::Reset, Duration::from_millis(1))
            .is_err());
    }
}
