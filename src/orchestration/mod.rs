pub mod canvas_orchestrator;

pub use canvas_orchestrator::{CanvasOrchestrator, CurrentImage, DetectOutcome, ImageTicket};
