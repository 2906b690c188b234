use std::process;

use clap::{CommandFactory, Parser};
use mk7led::{Command, HsvArg, PulseColorArg, PulseSlot, PulseSpeedArg, DEVICE_PATH};

const VALUE_NOTES: &str = "Pulse Speeds
 S, slow fractional range from 0-255 (default is 66)
 L, large range (default is 0)

HSV Values
 Hue ranges from 0 to 360
 Saturation and Value range from 0 to 255
 HSV colors match the HSV color wheel:
    http://colorizer.org/";

#[derive(Parser, Clone, Debug)]
#[command(about = "mk7led control", disable_help_flag = true, after_help = VALUE_NOTES)]
pub struct Args {
    #[arg(short, long, help = "Reset LEDs to default")]
    reset: bool,

    #[arg(short = '0', long, value_name = "H,S,V", help = "Set LED0 color to H, S, V")]
    led0: Option<HsvArg>,

    #[arg(short = '1', long, value_name = "H,S,V", help = "Set LED1 color to H, S, V")]
    led1: Option<HsvArg>,

    #[arg(short = '2', long, value_name = "H,S,V", help = "Set LED2 color to H, S, V")]
    led2: Option<HsvArg>,

    #[arg(short = '3', long, value_name = "H,S,V", help = "Set LED3 color to H, S, V")]
    led3: Option<HsvArg>,

    #[arg(short = 'p', long, value_name = "S[,L]", help = "Set pulse speed, lower is slower")]
    pulse_speed: Option<PulseSpeedArg>,

    #[arg(short = 'a', long, value_name = "H,S", help = "Set pulse color A hue, saturation")]
    pulse_a: Option<PulseColorArg>,

    #[arg(short = 'b', long, value_name = "H,S", help = "Set pulse color B hue, saturation")]
    pulse_b: Option<PulseColorArg>,

    #[arg(short = 'h', long, help = "Print this help")]
    help: bool,
}

impl Args {
    /// The controller applies effects in arrival order, so the emit order is
    /// fixed no matter how the flags were given: reset first, then the four
    /// LEDs, then the pulse parameters.
    fn commands(&self) -> Vec<Command> {
        let mut commands = Vec::new();

        if self.reset {
            commands.push(Command::Reset);
        }

        let leds = [self.led0, self.led1, self.led2, self.led3];
        for (index, color) in leds.into_iter().enumerate() {
            if let Some(color) = color {
                commands.push(Command::SetLed {
                    index: index as u8,
                    color,
                });
            }
        }

        if let Some(speed) = self.pulse_speed {
            commands.push(Command::PulseSpeed(speed));
        }

        if let Some(color) = self.pulse_a {
            commands.push(Command::PulseColor {
                slot: PulseSlot::A,
                color,
            });
        }

        if let Some(color) = self.pulse_b {
            commands.push(Command::PulseColor {
                slot: PulseSlot::B,
                color,
            });
        }

        commands
    }
}

fn usage() {
    let _ = Args::command().print_help();
}

fn main() {
    env_logger::init();

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            // Exit 1 on bad arguments rather than clap's usual 2.
            let _ = err.print();
            process::exit(1);
        }
    };

    if args.help {
        usage();
        process::exit(1);
    }

    let commands = args.commands();
    if commands.is_empty() {
        eprintln!("Nothing to do...");
        usage();
        process::exit(1);
    }

    let mut port = match mk7led::open_port(DEVICE_PATH) {
        Ok(port) => port,
        Err(err) => {
            eprintln!("ERROR:  {err}");
            process::exit(1);
        }
    };

    if let Err(err) = mk7led::send_all(&mut port, &commands) {
        eprintln!("ERROR:  {err}");
        process::exit(1);
    }
}
