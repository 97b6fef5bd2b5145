//! Install/activate state machine.

use std::sync::{Mutex, MutexGuard};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
  /// Created, install not attempted yet
  Parsed,
  Installing,
  /// Precache done, waiting to activate
  Installed,
  Activating,
  Activated,
  /// Install failed; a new install may be attempted
  Redundant,
}

impl LifecycleState {
  pub fn as_str(self) -> &'static str {
    match self {
      LifecycleState::Parsed => "parsed",
      LifecycleState::Installing => "installing",
      LifecycleState::Installed => "installed",
      LifecycleState::Activating => "activating",
      LifecycleState::Activated => "activated",
      LifecycleState::Redundant => "redundant",
    }
  }
}

#[derive(Debug)]
struct Inner {
  state: LifecycleState,
  skip_waiting: bool,
  clients_claimed: bool,
}

/// Tracks the worker's lifecycle phase.
///
/// `Activated` is only reported once both [`force_immediate_activation`]
/// and [`take_over_existing_clients`] have run.
///
/// [`force_immediate_activation`]: Lifecycle::force_immediate_activation
/// [`take_over_existing_clients`]: Lifecycle::take_over_existing_clients
#[derive(Debug)]
pub struct Lifecycle {
  inner: Mutex<Inner>,
}

impl Default for Lifecycle {
  fn default() -> Self {
    Self {
      inner: Mutex::new(Inner {
        state: LifecycleState::Parsed,
        skip_waiting: false,
        clients_claimed: false,
      }),
    }
  }
}

impl Lifecycle {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> MutexGuard<'_, Inner> {
    // State is plain data; a panic elsewhere cannot leave it half-written.
    self.inner.lock().unwrap_or_else(|e| e.into_inner())
  }

  pub fn state(&self) -> LifecycleState {
    self.lock().state
  }

  pub fn begin_install(&self) -> Result<()> {
    let mut inner = self.lock();
    match inner.state {
      LifecycleState::Parsed | LifecycleState::Redundant => {
        inner.state = LifecycleState::Installing;
        Ok(())
      }
      other => Err(Error::Lifecycle {
        expected: "parsed",
        actual: other.as_str(),
      }),
    }
  }

  pub fn finish_install(&self, succeeded: bool) {
    self.lock().state = if succeeded {
      LifecycleState::Installed
    } else {
      LifecycleState::Redundant
    };
  }

  /// Activate as soon as install completes instead of waiting for the
  /// previous worker's clients to go away.
  pub fn force_immediate_activation(&self) {
    self.lock().skip_waiting = true;
  }

  /// Start controlling clients that were opened before this worker.
  pub fn take_over_existing_clients(&self) {
    self.lock().clients_claimed = true;
  }

  pub fn begin_activate(&self) -> Result<()> {
    let mut inner = self.lock();
    if inner.state != LifecycleState::Installed {
      return Err(Error::Lifecycle {
        expected: "installed",
        actual: inner.state.as_str(),
      });
    }
    inner.state = LifecycleState::Activating;
    Ok(())
  }

  /// Return to `Installed` after a failed activation so it can be retried.
  pub fn abort_activate(&self) {
    let mut inner = self.lock();
    if inner.state == LifecycleState::Activating {
      inner.state = LifecycleState::Installed;
    }
  }

  pub fn finish_activate(&self) -> Result<()> {
    let mut inner = self.lock();
    if !inner.skip_waiting {
      return Err(Error::Lifecycle {
        expected: "skip-waiting requested",
        actual: inner.state.as_str(),
      });
    }
    if !inner.clients_claimed {
      return Err(Error::Lifecycle {
        expected: "clients claimed",
        actual: inner.state.as_str(),
      });
    }
    inner.state = LifecycleState::Activated;
    Ok(())
  }
}
