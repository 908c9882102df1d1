use crate::error::Result;
use crate::types::{HealthCheckRecord, Instance, MasterState};

use super::election::ElectionEngine;

/// State cached for the lifetime of one callback invocation.
///
/// Master state is only ever read through [`InvocationContext::retrieve_master`];
/// passing `reload = true` drops the cached snapshot first.
#[derive(Debug)]
pub struct InvocationContext {
    pub self_instance: Instance,
    pub self_health_check: Option<HealthCheckRecord>,
    master: Option<MasterState>,
}

impl InvocationContext {
    pub fn new(self_instance: Instance) -> Self {
        Self {
            self_instance,
            self_health_check: None,
            master: None,
        }
    }

    pub async fn retrieve_master(
        &mut self,
        engine: &ElectionEngine,
        reload: bool,
    ) -> Result<&MasterState> {
        if reload || self.master.is_none() {
            self.master = Some(engine.load_master_state().await?);
        }
        Ok(self.master())
    }

    /// Last master snapshot, empty when none was read yet.
    pub fn master(&self) -> &MasterState {
        static EMPTY: MasterState = MasterState {
            record: None,
            info: None,
            health_check: None,
        };
        self.master.as_ref().unwrap_or(&EMPTY)
    }

    /// Forget the master entirely for the rest of this invocation.
    pub fn clear_master(&mut self) {
        self.master = Some(MasterState::default());
    }

    pub fn is_master(&self, master_group: &str) -> bool {
        self.master().is_master(&self.self_instance, master_group)
    }
}
