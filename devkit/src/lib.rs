/*!
# nagsync devkit - test support for the kernel

- recording MQTT stub, so control-channel publishes can be asserted without a broker
- builders for Nagios event payloads and snapshot replies
*/

pub mod builders;
pub mod mqtt_stub;

pub use builders::{CheckResult, NagiosEventBuilder, SnapshotBuilder};
pub use mqtt_stub::{MockMessage, MockMqttClient};
