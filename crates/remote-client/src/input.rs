//! Line commands for the interactive controller.

use remote_proto::protocol::{Command, DeviceId, DeviceSummary};

use crate::controller::ControllerEvent;

pub const HELP: &str = "\
commands:
  list                 refresh the device list
  pair <n|device_id>   pair with a listed device
  unpair
  play <video_id> [start_secs]
  pause | resume
  seek <secs>          (drag <secs> ... release for a held seek)
  drag <secs>
  release
  vol <0..1>
  next | prev
  quit";

#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Event(ControllerEvent),
    Help,
    Quit,
}

/// Parse one line.  `devices` is the last list shown, for `pair <n>`.
pub fn parse_line(line: &str, devices: &[DeviceSummary]) -> Result<Option<Input>, String> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };
    let arg = words.next();

    let number = |arg: Option<&str>, what: &str| -> Result<f64, String> {
        arg.ok_or_else(|| format!("{} needs a number", what))?
            .parse::<f64>()
            .map_err(|_| format!("{} needs a number", what))
    };

    let input = match verb {
        "list" | "ls" => Input::Event(ControllerEvent::RefreshDevices),
        "help" | "?" => Input::Help,
        "quit" | "exit" | "q" => Input::Quit,
        "pair" => {
            let target = arg.ok_or("pair needs a device number or id")?;
            let device_id = match target.parse::<usize>() {
                Ok(n) if n >= 1 && n <= devices.len() => devices[n - 1].device_id.clone(),
                Ok(n) => return Err(format!("no device #{}", n)),
                Err(_) => DeviceId::new(target),
            };
            Input::Event(ControllerEvent::SelectDevice(device_id))
        }
        "unpair" => Input::Event(ControllerEvent::Unpair),
        "play" => {
            let video_id = arg.ok_or("play needs a video id")?;
            let mut command = Command::play(video_id);
            if let Some(start) = words.next() {
                let start = start
                    .parse::<f64>()
                    .map_err(|_| "start time must be a number".to_string())?;
                if let Command::Play { start_time, .. } = &mut command {
                    *start_time = Some(start);
                }
            }
            Input::Event(ControllerEvent::Issue(command))
        }
        "pause" => Input::Event(ControllerEvent::Issue(Command::Pause)),
        "resume" => Input::Event(ControllerEvent::Issue(Command::Resume)),
        "seek" => Input::Event(ControllerEvent::Issue(Command::Seek {
            time: number(arg, "seek")?,
        })),
        "drag" => Input::Event(ControllerEvent::SeekDragMove(number(arg, "drag")?)),
        "release" => Input::Event(ControllerEvent::SeekDragEnd),
        "vol" | "volume" => Input::Event(ControllerEvent::Issue(Command::Volume {
            level: number(arg, "vol")?,
        })),
        "next" => Input::Event(ControllerEvent::Issue(Command::QueueNext)),
        "prev" => Input::Event(ControllerEvent::Issue(Command::QueuePrev)),
        other => return Err(format!("unknown command {:?} (try help)", other)),
    };
    Ok(Some(input))
}
