/// Engine tuning knobs. Defaults suit a mid-size deployment; the
/// surrounding platform overrides them from its own configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Hard cap a pull page is truncated to, regardless of the
    /// caller-requested limit.
    pub max_pull_limit: usize,
    /// Page size used when the caller does not request one.
    pub default_pull_limit: usize,
    /// Verify batch checksums and device signatures before ingesting.
    pub verify_signatures: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_pull_limit: 500,
            default_pull_limit: 100,
            verify_signatures: true,
        }
    }
}
