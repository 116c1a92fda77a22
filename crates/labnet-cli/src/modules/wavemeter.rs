//! Simulated eight-channel wavemeter.

use labnet_rpc::{Arguments, BoundArgs, Contract, Operation, RpcClient};
use labnet_server::{ModuleError, Service};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

const SPEED_OF_LIGHT_NM_THZ: f64 = 299_792.458;
const CHANNELS: u32 = 8;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Units {
    #[default]
    #[serde(rename = "Frequency (THz)")]
    Frequency,
    #[serde(rename = "Wavelength (nm)")]
    Wavelength,
}

impl Units {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "Frequency (THz)" => Some(Units::Frequency),
            "Wavelength (nm)" => Some(Units::Wavelength),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Units::Frequency => "Frequency (THz)",
            Units::Wavelength => "Wavelength (nm)",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SimWavemeter {
    /// Per-channel frequency in THz
    base: Vec<f64>,
    jitter: f64,
}

impl Default for SimWavemeter {
    fn default() -> Self {
        Self::new(406.7, 1e-5)
    }
}

impl SimWavemeter {
    /// Channel `n` reads near `first_thz + (n - 1) * 0.01`.
    #[must_use]
    pub fn new(first_thz: f64, jitter: f64) -> Self {
        let base = (0..CHANNELS)
            .map(|i| first_thz + f64::from(i) * 0.01)
            .collect();
        Self { base, jitter }
    }

    pub fn get_wavelength(&self, channel: u32, units: Units) -> Result<f64, ModuleError> {
        let index = channel
            .checked_sub(1)
            .and_then(|i| usize::try_from(i).ok())
            .filter(|&i| i < self.base.len())
            .ok_or_else(|| {
                ModuleError::failed(format!("channel must be 1-{CHANNELS}, got {channel}"))
            })?;

        let noise = if self.jitter > 0.0 {
            rand::rng().random_range(-self.jitter..=self.jitter)
        } else {
            0.0
        };
        let frequency = self.base[index] + noise;
        Ok(match units {
            Units::Frequency => frequency,
            Units::Wavelength => SPEED_OF_LIGHT_NM_THZ / frequency,
        })
    }
}

pub struct WavemeterService;

const GET_WAVELENGTH: Operation = Operation::new("get_wavelength", &["channel", "units"]);

impl Service for WavemeterService {
    type Module = SimWavemeter;
    const MODULE_TYPE: &'static str = "wavemeter";
    const OPERATIONS: &'static [Operation] = &[GET_WAVELENGTH];

    async fn invoke(&self, module: &SimWavemeter, args: BoundArgs) -> Result<Value, ModuleError> {
        let channel: u32 = args.get(0)?;
        let units: String = args.get(1)?;
        let units = Units::parse(&units)
            .ok_or_else(|| ModuleError::failed(format!("unknown units '{units}'")))?;
        Ok(json!(module.get_wavelength(channel, units)?))
    }
}

/// Typed client for [`WavemeterService`]
#[derive(Debug, Clone)]
pub struct WavemeterClient {
    client: RpcClient,
}

impl Contract for WavemeterClient {
    const MODULE_TYPE: &'static str = WavemeterService::MODULE_TYPE;
    const OPERATIONS: &'static [Operation] = &[GET_WAVELENGTH];

    fn from_client(client: RpcClient) -> Self {
        Self { client }
    }
}

impl WavemeterClient {
    pub async fn get_wavelength(&self, channel: u32, units: Units) -> labnet_rpc::Result<f64> {
        self.client
            .call_as(
                "get_wavelength",
                Arguments::positional([json!(channel), json!(units.as_str())]),
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channels_are_one_based() {
        let wm = SimWavemeter::new(400.0, 0.0);
        assert!((wm.get_wavelength(1, Units::Frequency).unwrap() - 400.0).abs() < 1e-9);
        assert!((wm.get_wavelength(8, Units::Frequency).unwrap() - 400.07).abs() < 1e-9);
        assert!(wm.get_wavelength(0, Units::Frequency).is_err());
        assert!(wm.get_wavelength(9, Units::Frequency).is_err());
    }

    #[test]
    fn test_wavelength_units() {
        let wm = SimWavemeter::new(SPEED_OF_LIGHT_NM_THZ / 737.0, 0.0);
        let nm = wm.get_wavelength(1, Units::Wavelength).unwrap();
        assert!((nm - 737.0).abs() < 1e-9);
    }

    #[test]
    fn test_jitter_stays_bounded() {
        let wm = SimWavemeter::new(406.7, 1e-3);
        for _ in 0..100 {
            let f = wm.get_wavelength(1, Units::Frequency).unwrap();
            assert!((f - 406.7).abs() <= 1e-3 + 1e-12);
        }
    }

    #[test]
    fn test_units_names() {
        assert_eq!(Units::parse("Wavelength (nm)"), Some(Units::Wavelength));
        assert_eq!(Units::parse("nm"), None);
        assert_eq!(
            serde_json::to_value(Units::Frequency).unwrap(),
            json!("Frequency (THz)")
        );
    }
}
