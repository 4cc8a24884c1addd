// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::future::Future;
use std::io;
use std::time::Duration;

use log::info;
use log::warn;
use tokio::signal::unix::signal;
use tokio::signal::unix::SignalKind;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::error::Error;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// SIGINT, usually ctrl-c on the terminal running the daemon.
    Interrupt,
    /// SIGTERM from the service manager.
    Terminate,
    /// Every sender of the shutdown channel is gone.
    Closed,
}

pub type ShutdownReceiver = mpsc::Receiver<ShutdownReason>;

/// Respond to both SIGINT and SIGTERM by sending a shutdown request on
/// `sender`. Every signal is forwarded until the receiver is dropped. Must be
/// called from within a tokio runtime.
pub fn install_signal_handlers(sender: mpsc::Sender<ShutdownReason>) -> io::Result<()> {
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    tokio::spawn(async move {
        loop {
            let reason = tokio::select! {
                Some(()) = interrupt.recv() => ShutdownReason::Interrupt,
                Some(()) = terminate.recv() => ShutdownReason::Terminate,
                else => break,
            };
            info!("Shutdown signal received: {:?}", reason);
            match sender.try_send(reason) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => warn!("Shutdown already in progress"),
                Err(TrySendError::Closed(_)) => break,
            }
        }
    });
    Ok(())
}

/// Runs `future` until it completes or a shutdown request arrives, whichever
/// comes first. A shutdown request drops `future` and surfaces as
/// `Error::Cancelled`.
pub async fn cancellable<T, F>(shutdown: &mut ShutdownReceiver, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        reason = shutdown.recv() => {
            Err(Error::Cancelled(reason.unwrap_or(ShutdownReason::Closed)))
        }
        result = future => result,
    }
}

/// Sleeps for `duration` unless a shutdown request arrives first.
pub async fn interruptible_sleep(shutdown: &mut ShutdownReceiver, duration: Duration) -> Result<()> {
    cancellable(shutdown, async {
        tokio::time::sleep(duration).await;
        Ok::<(), Error>(())
    })
    .await
}

#[cfg(test)]
mod tests {
    use nix::sys::signal::raise;
    use nix::sys::signal::Signal;

    use super::*;

    #[tokio::test]
    async fn test_cancellable_returns_result_without_shutdown() {
        let (_sender, mut receiver) = mpsc::channel(1);
        let result = cancellable(&mut receiver, async { Ok::<_, Error>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_cancellable_interrupts_pending_future() {
        let (sender, mut receiver) = mpsc::channel(1);
        sender.send(ShutdownReason::Terminate).await.unwrap();
        let result: Result<()> = cancellable(&mut receiver, std::future::pending()).await;
        assert!(matches!(
            result,
            Err(Error::Cancelled(ShutdownReason::Terminate))
        ));
    }

    #[tokio::test]
    async fn test_closed_channel_cancels() {
        let (sender, mut receiver) = mpsc::channel::<ShutdownReason>(1);
        drop(sender);
        let result = interruptible_sleep(&mut receiver, Duration::from_secs(3600)).await;
        assert!(matches!(
            result,
            Err(Error::Cancelled(ShutdownReason::Closed))
        ));
    }

    #[tokio::test]
    async fn test_every_signal_is_forwarded() {
        let (sender, mut receiver) = mpsc::channel(1);
        install_signal_handlers(sender).unwrap();
        for _ in 0..2 {
            raise(Signal::SIGTERM).unwrap();
            assert_eq!(receiver.recv().await, Some(ShutdownReason::Terminate));
        }
    }

    #[tokio::test]
    async fn test_interruptible_sleep_completes() {
        let (_sender, mut receiver) = mpsc::channel(1);
        interruptible_sleep(&mut receiver, Duration::ZERO)
            .await
            .unwrap();
    }
}
