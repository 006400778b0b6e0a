// Application state for HTTP handlers
use crate::application::machine_service::MachineService;

#[derive(Clone)]
pub struct AppState {
    pub machine_service: MachineService,
}
