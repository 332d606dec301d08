// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Scale Invariant

/// UI message queue
/// The only way background threads reach bar state: post a BarMessage, the
/// UI thread drains it. An optional waker nudges the platform event loop.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use tracing::debug;

use crate::fbgt_types::BarMessage;

type Waker = Arc<dyn Fn() + Send + Sync>;

#[derive(Clone)]
pub struct UiQueue {
    tx: Sender<BarMessage>,
    waker: Option<Waker>,
}

impl UiQueue {
    pub fn channel() -> (UiQueue, Receiver<BarMessage>) {
        let (tx, rx) = mpsc::channel();
        (UiQueue { tx, waker: None }, rx)
    }

    pub fn with_waker<F>(mut self, waker: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.waker = Some(Arc::new(waker));
        self
    }

    pub fn post(&self, message: BarMessage) {
        if self.tx.send(message).is_err() {
            debug!("UI queue closed, message dropped");
            return;
        }
        if let Some(wake) = &self.waker {
            wake();
        }
    }
}
