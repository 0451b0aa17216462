//! Host-side serial port discovery.
//!
//! Ports are classified by USB vendor/product id so the flight controller's
//! own USB interface can be told apart from USB-UART bridges and anything
//! else plugged in.

use crate::error::{Error, Result};

#[cfg(feature = "native")]
use log::{debug, info, trace};

/// What a USB serial device looks like.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DeviceKind {
    /// ArduPilot ChibiOS firmware (pid.codes VID).
    ArduPilot,
    /// STM32 virtual COM port, used by many flight controllers.
    Stm32Vcp,
    /// CubePilot autopilot.
    CubePilot,
    /// Holybro autopilot.
    Holybro,
    /// 3D Robotics / PX4 bootloader VID.
    ThreeDr,
    /// CH340/CH341 USB-to-Serial converter.
    Ch340,
    /// Silicon Labs CP210x USB-to-Serial converter.
    Cp210x,
    /// FTDI USB-to-Serial converter.
    Ftdi,
    /// Unknown device.
    Unknown,
}

/// Known USB VID/PID pairs. An empty PID list matches any product.
const KNOWN_USB_DEVICES: &[(u16, &[u16], DeviceKind)] = &[
    (0x1209, &[0x5740, 0x5741], DeviceKind::ArduPilot),
    (0x0483, &[0x5740], DeviceKind::Stm32Vcp),
    (0x2DAE, &[], DeviceKind::CubePilot),
    (0x3162, &[], DeviceKind::Holybro),
    (0x26AC, &[], DeviceKind::ThreeDr),
    (0x1A86, &[0x7523, 0x7522, 0x5523, 0x55D4], DeviceKind::Ch340),
    (0x10C4, &[0xEA60, 0xEA70, 0xEA71], DeviceKind::Cp210x),
    (0x0403, &[0x6001, 0x6010, 0x6011, 0x6014, 0x6015], DeviceKind::Ftdi),
];

impl DeviceKind {
    /// Classify a USB VID/PID pair.
    #[must_use]
    pub fn from_vid_pid(vid: u16, pid: u16) -> Self {
        for (known_vid, pids, device) in KNOWN_USB_DEVICES {
            if vid == *known_vid && (pids.is_empty() || pids.contains(&pid)) {
                return *device;
            }
        }
        Self::Unknown
    }

    /// Human-readable name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ArduPilot => "ArduPilot",
            Self::Stm32Vcp => "STM32 VCP",
            Self::CubePilot => "CubePilot",
            Self::Holybro => "Holybro",
            Self::ThreeDr => "3DR",
            Self::Ch340 => "CH340/CH341",
            Self::Cp210x => "CP210x",
            Self::Ftdi => "FTDI",
            Self::Unknown => "Unknown",
        }
    }

    /// Native USB interface of a flight controller.
    pub fn is_flight_controller(&self) -> bool {
        matches!(
            self,
            Self::ArduPilot | Self::Stm32Vcp | Self::CubePilot | Self::Holybro | Self::ThreeDr
        )
    }

    /// Any recognized device.
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

/// A serial port found on the host.
#[derive(Debug, Clone)]
pub struct DetectedPort {
    /// Port name/path (e.g., "/dev/ttyACM0" or "COM5").
    pub name: String,
    /// Classified device kind.
    pub device: DeviceKind,
    /// USB Vendor ID (if available).
    pub vid: Option<u16>,
    /// USB Product ID (if available).
    pub pid: Option<u16>,
    /// Device manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Device product string (if available).
    pub product: Option<String>,
    /// Serial number (if available).
    pub serial: Option<String>,
}

impl DetectedPort {
    /// A port with only a name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            device: DeviceKind::Unknown,
            vid: None,
            pid: None,
            manufacturer: None,
            product: None,
            serial: None,
        }
    }

    /// Whether this looks like a flight controller.
    pub fn is_flight_controller(&self) -> bool {
        self.device
            .is_flight_controller()
            || self
                .product
                .as_deref()
                .is_some_and(|p| p.contains("ArduPilot") || p.contains("PX4"))
    }
}

/// All serial ports, flight controllers first.
#[cfg(feature = "native")]
#[must_use]
pub fn discover_ports() -> Vec<DetectedPort> {
    let mut result = Vec::new();

    match serialport::available_ports() {
        Ok(ports) => {
            for port_info in ports {
                let mut detected = DetectedPort::named(port_info.port_name);

                if let serialport::SerialPortType::UsbPort(usb_info) = port_info.port_type {
                    detected.vid = Some(usb_info.vid);
                    detected.pid = Some(usb_info.pid);
                    detected.manufacturer = usb_info.manufacturer;
                    detected.product = usb_info.product;
                    detected.serial = usb_info.serial_number;
                    detected.device = DeviceKind::from_vid_pid(usb_info.vid, usb_info.pid);

                    trace!(
                        "Found USB port: {} (VID: {:04X}, PID: {:04X}, Device: {:?})",
                        detected.name, usb_info.vid, usb_info.pid, detected.device
                    );
                }

                result.push(detected);
            }
        },
        Err(e) => {
            debug!("Failed to enumerate serial ports: {e}");
        },
    }

    sort_ports(&mut result);
    result
}

/// Without native serial support there is nothing to enumerate.
#[cfg(not(feature = "native"))]
#[must_use]
pub fn discover_ports() -> Vec<DetectedPort> {
    Vec::new()
}

/// Flight controllers, then known bridges, then the rest; by name within.
fn sort_ports(ports: &mut [DetectedPort]) {
    ports.sort_by_key(|p| {
        let rank = if p.is_flight_controller() {
            0
        } else if p
            .device
            .is_known()
        {
            1
        } else {
            2
        };
        (rank, p.name.clone())
    });
}

/// Pick the port to use when none was given.
///
/// A single flight controller wins. Several flight controllers, or none,
/// leave the choice to the user.
pub fn auto_detect_port() -> Result<DetectedPort> {
    select_port(&discover_ports())
}

/// [`auto_detect_port`] over an already discovered list.
pub fn select_port(ports: &[DetectedPort]) -> Result<DetectedPort> {
    let mut controllers: Vec<DetectedPort> = ports
        .iter()
        .filter(|p| p.is_flight_controller())
        .cloned()
        .collect();

    match controllers.len() {
        1 => {
            let port = controllers.remove(0);
            #[cfg(feature = "native")]
            info!("Auto-detected {} flight controller: {}", port.device.name(), port.name);
            Ok(port)
        },
        0 => Err(Error::PortNotFound(format!(
            "{} serial port(s) present",
            ports.len()
        ))),
        n => Err(Error::PortNotFound(format!(
            "{n} flight controllers connected"
        ))),
    }
}

/// One display line per port.
pub fn format_port_list(ports: &[DetectedPort]) -> Vec<String> {
    ports
        .iter()
        .map(|port| {
            let device_info = if port
                .device
                .is_known()
            {
                format!(" [{}]", port.device.name())
            } else if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
                format!(" [VID:{vid:04X} PID:{pid:04X}]")
            } else {
                String::new()
            };

            let product_info = port
                .product
                .as_ref()
                .map(|p| format!(" - {p}"))
                .unwrap_or_default();

            format!("{}{}{}", port.name, device_info, product_info)
        })
        .collect()
}
