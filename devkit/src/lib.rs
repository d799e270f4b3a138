/*!
# Signage DevKit - test doubles for the player engine

Lets the engine run end to end without a content server or real hardware:
- Scriptable content resolver that records heartbeats and acknowledgements
- Device-control and screenshot doubles sharing one call log
- Builders for content payloads and commands
- `TestHarness` wiring a full player against the doubles
*/

pub mod fixtures;
pub mod harness;
pub mod mock_device;
pub mod mock_resolver;

pub use fixtures::{command, ContentBuilder};
pub use harness::TestHarness;
pub use mock_device::{MockDeviceControl, MockScreenshot};
pub use mock_resolver::{Call, CallLog, MockResolver};
