//! Device operation table

use std::fmt;

macro_rules! operations {
    ($($variant:ident => $path:literal,)*) => {
        /// Every operation a device answers, keyed by its topic path
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Operation {
            $($variant,)*
        }

        impl Operation {
            /// All operations, in table order
            pub const ALL: &'static [Operation] = &[$(Operation::$variant,)*];

            /// Topic path below `<root>/<deviceId>/`
            pub fn path(self) -> &'static str {
                match self {
                    $(Operation::$variant => $path,)*
                }
            }

            /// Look up an operation by topic path
            pub fn from_path(path: &str) -> Option<Self> {
                match path {
                    $($path => Some(Operation::$variant),)*
                    _ => None,
                }
            }
        }
    };
}

operations! {
    ListOperations => "operations/list",
    ListApps => "applications/list",
    LaunchApp => "applications/launch",
    LaunchAppWithContent => "applications/launch-with-content",
    GetAppState => "applications/get-state",
    ExitApp => "applications/exit",
    DeviceInfo => "device/info",
    Restart => "system/restart",
    ListSettings => "system/settings/list",
    GetSettings => "system/settings/get",
    SetSettings => "system/settings/set",
    ListLanguages => "system/language/list",
    GetLanguage => "system/language/get",
    SetLanguage => "system/language/set",
    ListKeys => "input/key/list",
    KeyPress => "input/key-press",
    LongKeyPress => "input/long-key-press",
    CaptureImage => "output/image",
    StartDeviceTelemetry => "device-telemetry/start",
    StopDeviceTelemetry => "device-telemetry/stop",
    StartAppTelemetry => "app-telemetry/start",
    StopAppTelemetry => "app-telemetry/stop",
    HealthCheck => "health-check/get",
    ListVoices => "voice/list",
    SetVoice => "voice/set",
    SendVoiceAudio => "voice/send-audio",
    SendVoiceText => "voice/send-text",
    Discovery => "discovery",
    Version => "version",
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}
