/*!
# Telemetry DevKit - stubs and helpers for agent tests

- Scripted samplers, no real host access needed
- Recording sink standing in for the collector link
- Ready-made configuration mappings
*/

pub mod sampler_stub;
pub mod test_utils;

pub use sampler_stub::ScriptedSampler;
pub use test_utils::{init_test_logging, valid_raw_config, RecordingSink};
