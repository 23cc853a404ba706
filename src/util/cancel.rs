// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::error::{PtaError, PtaResult};

/// A shared flag polled by the solver at each worklist pop and each
/// node-discovery iteration.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn check(&self) -> PtaResult<()> {
        if self.is_canceled() {
            Err(PtaError::Canceled)
        } else {
            Ok(())
        }
    }
}
