use std::io::{self, Write};
use std::str::FromStr;
use std::time::Duration;

use log::debug;
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use thiserror::Error;

/// The MK7 controller hangs off a fixed port, so there is nothing to configure.
pub const DEVICE_PATH: &str = "/dev/ttyS0";
pub const BAUD_RATE: u32 = 9600;

/// Every frame starts with four null bytes followed by the ASCII tag "MK7LED".
pub const PREAMBLE: [u8; 10] = [0, 0, 0, 0, b'M', b'K', b'7', b'L', b'E', b'D'];

/// Preamble plus the 4 command bytes.
pub const FRAME_LEN: usize = PREAMBLE.len() + 4;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to open {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: serialport::Error,
    },
    #[error("Failed to send {command} command: {source}")]
    Send {
        command: &'static str,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("Expected H,S,V")]
    ExpectedHsv,
    #[error("Expected 0-255 pulse speed")]
    ExpectedPulseSpeed,
    #[error("Expected 0-360 color hue")]
    ExpectedPulseColor,
}

/// Scale a hue in degrees down to the single byte the manual LED commands
/// carry: floor(h / 360 * 255). Hues past 360 keep scaling and the result
/// wraps modulo 256; the controller firmware has always seen it that way.
pub fn hsv_downsample(hue: u32) -> u8 {
    ((hue as f32 / 360.0) * 255.0) as u32 as u8
}

fn fields(s: &str) -> impl Iterator<Item = Result<u32, std::num::ParseIntError>> + '_ {
    s.split(',').map(|f| f.trim().parse())
}

/// An H,S,V triple as given on the command line. Hue stays in degrees until
/// encoding; saturation and value wrap modulo 256 like the original tool's
/// unsigned casts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HsvArg {
    pub hue: u32,
    pub sat: u8,
    pub val: u8,
}

impl FromStr for HsvArg {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut fields = fields(s);
        match (fields.next(), fields.next(), fields.next(), fields.next()) {
            (Some(Ok(hue)), Some(Ok(sat)), Some(Ok(val)), None) => Ok(HsvArg {
                hue,
                sat: sat as u8,
                val: val as u8,
            }),
            _ => Err(ParseError::ExpectedHsv),
        }
    }
}

/// Pulse speed "S" or "S,L". Lower speeds are slower; L widens the range and
/// defaults to 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PulseSpeedArg {
    pub speed: u8,
    pub range: u8,
}

impl FromStr for PulseSpeedArg {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut fields = fields(s);
        match (fields.next(), fields.next(), fields.next()) {
            (Some(Ok(speed)), None, _) => Ok(PulseSpeedArg {
                speed: speed as u8,
                range: 0,
            }),
            (Some(Ok(speed)), Some(Ok(range)), None) => Ok(PulseSpeedArg {
                speed: speed as u8,
                range: range as u8,
            }),
            _ => Err(ParseError::ExpectedPulseSpeed),
        }
    }
}

/// Pulse color "H,S". Unlike the manual LED commands the hue is NOT scaled
/// down from degrees; the pulse sub-protocol takes the raw byte, so values
/// past 255 wrap. The two sub-protocols diverged long ago and the firmware
/// expects exactly this.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PulseColorArg {
    pub hue: u8,
    pub sat: u8,
}

impl FromStr for PulseColorArg {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut fields = fields(s);
        match (fields.next(), fields.next(), fields.next()) {
            (Some(Ok(hue)), Some(Ok(sat)), None) => Ok(PulseColorArg {
                hue: hue as u8,
                sat: sat as u8,
            }),
            _ => Err(ParseError::ExpectedPulseColor),
        }
    }
}

/// The two colors the pulse mode cycles between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PulseSlot {
    A,
    B,
}

impl From<PulseSlot> for u8 {
    fn from(val: PulseSlot) -> Self {
        match val {
            PulseSlot::A => b'0',
            PulseSlot::B => b'1',
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Reset,
    SetLed { index: u8, color: HsvArg },
    PulseSpeed(PulseSpeedArg),
    PulseColor { slot: PulseSlot, color: PulseColorArg },
}

impl Command {
    /// The 4 command bytes that follow the preamble.
    pub fn encode(self) -> [u8; 4] {
        match self {
            Command::Reset => [b'R', 0, 0, 0],
            Command::SetLed { index, color } => [
                b'0' + index,
                hsv_downsample(color.hue),
                color.sat,
                color.val,
            ],
            Command::PulseSpeed(PulseSpeedArg { speed, range }) => [b'P', b'S', speed, range],
            Command::PulseColor { slot, color } => [b'P', slot.into(), color.hue, color.sat],
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Command::Reset => "reset",
            Command::SetLed { index: 0, .. } => "led0",
            Command::SetLed { index: 1, .. } => "led1",
            Command::SetLed { index: 2, .. } => "led2",
            Command::SetLed { .. } => "led3",
            Command::PulseSpeed(_) => "pulse-speed",
            Command::PulseColor { slot: PulseSlot::A, .. } => "pulse-a",
            Command::PulseColor { slot: PulseSlot::B, .. } => "pulse-b",
        }
    }
}

pub fn frame(payload: [u8; 4]) -> [u8; FRAME_LEN] {
    let mut frame = [0; FRAME_LEN];
    frame[..PREAMBLE.len()].copy_from_slice(&PREAMBLE);
    frame[PREAMBLE.len()..].copy_from_slice(&payload);
    frame
}

pub fn open_port(path: &str) -> Result<Box<dyn SerialPort>, Error> {
    serialport::new(path, BAUD_RATE)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::None)
        .timeout(Duration::from_millis(100))
        .open()
        .map_err(|source| Error::Open {
            path: path.to_string(),
            source,
        })
}

/// Write one frame per command, in the order given. The controller never
/// replies, but a failed write still aborts the run so the operator knows
/// which command never made it out.
pub fn send_all<W: Write>(port: &mut W, commands: &[Command]) -> Result<(), Error> {
    for command in commands {
        let frame = frame(command.encode());
        debug!("Sending {} frame: {:02x?}", command.name(), frame);

        port.write_all(&frame).map_err(|source| Error::Send {
            command: command.name(),
            source,
        })?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downsample_endpoints() {
        assert_eq!(hsv_downsample(0), 0);
        assert_eq!(hsv_downsample(360), 255);
    }

    #[test]
    fn downsample_truncates_toward_zero() {
        // 180/360*255 = 127.5
        assert_eq!(hsv_downsample(180), 127);
        assert_eq!(hsv_downsample(90), 63);
        assert_eq!(hsv_downsample(240), 170);
    }

    #[test]
    fn downsample_wraps_past_360() {
        // 400/360*255 = 283.33 -> 283 -> 27, no clamping
        assert_eq!(hsv_downsample(400), 27);
        assert_eq!(hsv_downsample(720), 254);
    }

    #[test]
    fn frame_is_preamble_plus_payload() {
        let frame = frame([b'R', 1, 2, 3]);
        assert_eq!(frame.len(), 14);
        assert_eq!(frame[..10], PREAMBLE);
        assert_eq!(frame[10..], [b'R', 1, 2, 3]);
    }

    #[test]
    fn encode_reset() {
        assert_eq!(Command::Reset.encode(), [b'R', 0, 0, 0]);
    }

    #[test]
    fn encode_led_scales_hue() {
        let cmd = Command::SetLed {
            index: 0,
            color: "180,128,64".parse().unwrap(),
        };
        assert_eq!(cmd.encode(), [b'0', 127, 128, 64]);
    }

    #[test]
    fn encode_led_indices() {
        for index in 0..4 {
            let cmd = Command::SetLed {
                index,
                color: "0,0,0".parse().unwrap(),
            };
            assert_eq!(cmd.encode()[0], b'0' + index);
        }
    }

    #[test]
    fn encode_pulse_speed() {
        let cmd = Command::PulseSpeed("66,1".parse().unwrap());
        assert_eq!(cmd.encode(), [b'P', b'S', 66, 1]);
    }

    #[test]
    fn encode_pulse_color_keeps_raw_hue() {
        // Pulse hues are not scaled, unlike the LED commands.
        let cmd = Command::PulseColor {
            slot: PulseSlot::A,
            color: "90,200".parse().unwrap(),
        };
        assert_eq!(cmd.encode(), [b'P', b'0', 90, 200]);

        let cmd = Command::PulseColor {
            slot: PulseSlot::B,
            color: "90,200".parse().unwrap(),
        };
        assert_eq!(cmd.encode(), [b'P', b'1', 90, 200]);
    }

    #[test]
    fn parse_hsv() {
        assert_eq!(
            "180,128,64".parse(),
            Ok(HsvArg {
                hue: 180,
                sat: 128,
                val: 64
            })
        );
        assert_eq!("180, 128, 64".parse::<HsvArg>().unwrap().sat, 128);
        assert_eq!("180,128".parse::<HsvArg>(), Err(ParseError::ExpectedHsv));
        assert_eq!("180,128,64,9".parse::<HsvArg>(), Err(ParseError::ExpectedHsv));
        assert_eq!("x,y,z".parse::<HsvArg>(), Err(ParseError::ExpectedHsv));
        assert_eq!("".parse::<HsvArg>(), Err(ParseError::ExpectedHsv));
    }

    #[test]
    fn parse_hsv_keeps_out_of_range_hue() {
        assert_eq!("400,0,0".parse::<HsvArg>().unwrap().hue, 400);
    }

    #[test]
    fn parse_pulse_speed_range_optional() {
        assert_eq!("66".parse(), Ok(PulseSpeedArg { speed: 66, range: 0 }));
        assert_eq!("66,1".parse(), Ok(PulseSpeedArg { speed: 66, range: 1 }));
        assert_eq!(
            "a".parse::<PulseSpeedArg>(),
            Err(ParseError::ExpectedPulseSpeed)
        );
        assert_eq!(
            "1,2,3".parse::<PulseSpeedArg>(),
            Err(ParseError::ExpectedPulseSpeed)
        );
    }

    #[test]
    fn parse_pulse_color() {
        assert_eq!("90,200".parse(), Ok(PulseColorArg { hue: 90, sat: 200 }));
        assert_eq!(
            "90".parse::<PulseColorArg>(),
            Err(ParseError::ExpectedPulseColor)
        );
    }

    #[test]
    fn send_all_writes_one_frame_per_command() {
        let mut wire = Vec::new();
        let commands = [
            Command::Reset,
            Command::PulseSpeed(PulseSpeedArg { speed: 66, range: 0 }),
        ];

        send_all(&mut wire, &commands).unwrap();

        assert_eq!(wire.len(), 2 * FRAME_LEN);
        assert_eq!(wire[..10], PREAMBLE);
        assert_eq!(wire[10..14], [b'R', 0, 0, 0]);
        assert_eq!(wire[14..24], PREAMBLE);
        assert_eq!(wire[24..], [b'P', b'S', 66, 0]);
    }

    #[test]
    fn send_all_reports_failed_command() {
        struct Broken;

        impl Write for Broken {
            fn write(&mut self, _: &[u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::BrokenPipe, "gone"))
            }

            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let err = send_all(&mut Broken, &[Command::Reset]).unwrap_err();
        assert!(matches!(err, Error::Send { command: "reset", .. }));
    }
}
