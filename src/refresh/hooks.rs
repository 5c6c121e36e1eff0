/// Callbacks into whatever surface displays refresh state.
pub trait RefreshHooks: Send + Sync {
  /// Toggle the "updating" flag.
  fn set_updating(&self, updating: bool);

  /// Re-render the status icon after the flag changed.
  fn update_status_icon(&self) {}

  /// Whether the synthetic bonus entry is already present.
  fn is_bonus_entry_inserted(&self) -> bool {
    true
  }

  /// Insert the synthetic bonus entry. Called only when it is absent.
  fn insert_bonus_entry(&self) {}
}

/// Hooks for headless runs.
#[derive(Debug, Default)]
pub struct NoopHooks;

impl RefreshHooks for NoopHooks {
  fn set_updating(&self, _updating: bool) {}
}
