use crate::prelude::*;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Target power in watts; negative charges from the grid.
    SetPower(config::Device, i32),
    ResetMeters(config::Device),
    /// New network address reported by discovery.
    SetAddress(config::Device, String),
}

impl Command {
    pub fn device(&self) -> &config::Device {
        use Command::*;

        match self {
            SetPower(device, _) | ResetMeters(device) | SetAddress(device, _) => device,
        }
    }

    pub fn to_result_topic(&self) -> String {
        use Command::*;

        let rest = match self {
            SetPower(device, _) => format!("{}/set/power", device.id()),
            ResetMeters(device) => format!("{}/reset_meters", device.id()),
            SetAddress(device, _) => format!("{}/set/address", device.id()),
        };

        format!("result/{}", rest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceKind;

    #[test]
    fn result_topics() {
        let hub = config::Device::new("hub", DeviceKind::Battery);
        assert_eq!(Command::SetPower(hub.clone(), -300).to_result_topic(), "result/hub/set/power");
        assert_eq!(Command::ResetMeters(hub.clone()).to_result_topic(), "result/hub/reset_meters");
        assert_eq!(
            Command::SetAddress(hub, "10.0.0.2".to_string()).to_result_topic(),
            "result/hub/set/address"
        );
    }
}
