//! Application state over an in-memory container runtime.

use std::path::Path;
use std::sync::Arc;

use fieldpanel_core::Settings;
use fieldpanel_runtime::memory::InMemoryRuntime;
use fieldpanel_runtime::{ContainerRuntime, ProcessTable};
use regex::Regex;

use crate::state::AppState;

pub struct NoProcesses;

impl ProcessTable for NoProcesses {
    fn find(&self, _pattern: &Regex) -> Vec<u32> {
        Vec::new()
    }

    fn terminate(&self, _pid: u32) -> bool {
        false
    }
}

pub fn app(root: &Path) -> (AppState, Arc<InMemoryRuntime>) {
    let mut settings = Settings::default();
    settings.workspace.root = root.to_path_buf();
    let runtime = Arc::new(InMemoryRuntime::new());
    let state = AppState::new(
        settings,
        Some(runtime.clone() as Arc<dyn ContainerRuntime>),
        Arc::new(NoProcesses),
    )
    .unwrap();
    (state, runtime)
}
