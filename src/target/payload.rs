//! Request and response bodies for the registration service.

use crate::source::page::Record;
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use std::str::FromStr;

/// Platform codes understood by the registration service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceType {
    #[default]
    Ios,
    BlackBerry,
    Android,
    NokiaAsha,
    WindowsPhone,
    // There is no device type 6.
    OsX,
    Windows8,
    Amazon,
    Safari,
}

impl DeviceType {
    pub fn code(self) -> u8 {
        match self {
            DeviceType::Ios => 1,
            DeviceType::BlackBerry => 2,
            DeviceType::Android => 3,
            DeviceType::NokiaAsha => 4,
            DeviceType::WindowsPhone => 5,
            DeviceType::OsX => 7,
            DeviceType::Windows8 => 8,
            DeviceType::Amazon => 9,
            DeviceType::Safari => 10,
        }
    }
}

impl Serialize for DeviceType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

impl FromStr for DeviceType {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        let device_type = match value.trim().to_ascii_lowercase().as_str() {
            "1" | "ios" => DeviceType::Ios,
            "2" | "blackberry" | "bb" => DeviceType::BlackBerry,
            "3" | "android" => DeviceType::Android,
            "4" | "nokia_asha" | "nokia" => DeviceType::NokiaAsha,
            "5" | "windows_phone" | "wp" => DeviceType::WindowsPhone,
            "7" | "osx" | "os_x" | "macos" => DeviceType::OsX,
            "8" | "windows_8" | "windows8" => DeviceType::Windows8,
            "9" | "amazon" => DeviceType::Amazon,
            "10" | "safari" => DeviceType::Safari,
            other => bail!("unknown device type {other:?}"),
        };
        Ok(device_type)
    }
}

/// Per-run values stamped on every registration request.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistrationDefaults {
    pub auth: String,
    pub application: String,
    pub device_type: DeviceType,
    pub language: Option<String>,
    pub timezone: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegisterDevice {
    pub request: RegisterDeviceRequest,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegisterDeviceRequest {
    pub auth: String,
    pub application: String,
    pub device_type: DeviceType,
    pub hwid: String,
    pub push_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone: Option<f64>,
}

impl RegisterDevice {
    /// The registry exposes no hardware id, so the push token doubles as `hwid`.
    pub fn for_record(defaults: &RegistrationDefaults, record: &Record) -> Self {
        Self {
            request: RegisterDeviceRequest {
                auth: defaults.auth.clone(),
                application: defaults.application.clone(),
                device_type: defaults.device_type,
                hwid: record.id.clone(),
                push_token: record.id.clone(),
                language: defaults.language.clone().filter(|lang| !lang.is_empty()),
                timezone: defaults.timezone,
            },
        }
    }
}

pub const STATUS_OK_CODE: i64 = 200;
pub const STATUS_OK_MESSAGE: &str = "OK";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterResponse {
    #[serde(default)]
    pub status_code: i64,
    #[serde(default)]
    pub status_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
}

impl RegisterResponse {
    pub fn ok() -> Self {
        Self {
            status_code: STATUS_OK_CODE,
            status_message: STATUS_OK_MESSAGE.to_owned(),
            response: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status_code == STATUS_OK_CODE && self.status_message == STATUS_OK_MESSAGE
    }
}
