pub mod sandbox;
pub mod synthesis;

pub use sandbox::{plan_sandboxes, PlannedSandbox, SandboxPlacementOutcome};
pub use synthesis::{build_synthesis_request, SynthesisRequest, SynthesisScheduler};
