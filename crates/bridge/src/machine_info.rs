//! Builders for the `firmware` and `machine_data` descriptions.

use serde_json::{Map, Value};

use crate::collaborators::{FirmwareVersion, NetworkInfo, SystemInfo};

pub const FIRMWARE_NAME: &str = "Klipper";
pub const FIRMWARE_LINK: &str = "https://github.com/Klipper3d/klipper";

/// Firmware description reported under `firmware.fw`.
///
/// Builds from a dirty tree (`-dirty` suffix) or an unknown version (`?`)
/// are flagged unsafe and lose their last `-` suffix.
pub fn firmware_info(fw: &FirmwareVersion) -> Map<String, Value> {
    let unsafe_build = fw.version.ends_with("-dirty") || fw.version == "?";
    let version = if unsafe_build {
        fw.version
            .rsplit_once('-')
            .map_or(fw.version.as_str(), |(head, _)| head)
    } else {
        fw.version.as_str()
    };

    let mut info = Map::new();
    info.insert("firmware".into(), Value::from(FIRMWARE_NAME));
    info.insert("firmware_version".into(), Value::from(version));
    info.insert(
        "firmware_date".into(),
        Value::from(fw.date.clone().unwrap_or_default()),
    );
    info.insert("firmware_link".into(), Value::from(FIRMWARE_LINK));
    info.insert("firmware_unsafe".into(), Value::Bool(unsafe_build));
    info
}

/// Complete machine description. `ui` is the `{ui, ui_version}` pair of
/// the tracked web connection.
pub fn machine_data(
    ui: Map<String, Value>,
    sys: &SystemInfo,
    net: &NetworkInfo,
) -> Map<String, Value> {
    let mut data = ui;
    data.insert("api".into(), Value::from(sys.api.clone()));
    data.insert("api_version".into(), Value::from(sys.api_version.clone()));
    data.insert("sp_version".into(), Value::from(env!("CARGO_PKG_VERSION")));
    data.insert(
        "python_version".into(),
        Value::from(sys.runtime_version.clone()),
    );
    data.insert("machine".into(), Value::from(machine_model(sys)));
    data.insert(
        "os".into(),
        Value::from(non_empty_or_unknown(&sys.distribution)),
    );
    data.insert("is_ethernet".into(), Value::from(i64::from(!net.is_wifi)));
    data.insert(
        "ssid".into(),
        Value::from(net.ssid.clone().unwrap_or_default()),
    );
    data.insert(
        "local_ip".into(),
        Value::from(
            net.address
                .clone()
                .unwrap_or_else(|| "Unknown".to_string()),
        ),
    );
    data.insert("hostname".into(), Value::from(net.hostname.clone()));
    data
}

/// Some boards only report a numeric model; fall back to the description.
fn machine_model(sys: &SystemInfo) -> String {
    let model = sys.cpu_model.as_str();
    if model.is_empty() || model.chars().all(|c| c.is_ascii_digit()) {
        non_empty_or_unknown(&sys.cpu_desc)
    } else {
        model.to_string()
    }
}

fn non_empty_or_unknown(s: &str) -> String {
    if s.is_empty() {
        "Unknown".to_string()
    } else {
        s.to_string()
    }
}
