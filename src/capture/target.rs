//! Capture target descriptors
//!
//! A `CaptureTarget` is what the caller asks to record. The backend resolves
//! it once per session into a `ResolvedTarget` carrying the capture surface
//! size.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Sub-rectangle of a display, in display points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CaptureRect {
    /// Whether the rect lies inside a `width` x `height` surface
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        let right = self.x.checked_add(self.width);
        let bottom = self.y.checked_add(self.height);
        matches!((right, bottom), (Some(r), Some(b)) if r <= width && b <= height)
    }
}

/// What to record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum CaptureTarget {
    /// A whole display
    #[serde(rename_all = "camelCase")]
    Display { display_id: u32 },

    /// One or more windows
    #[serde(rename_all = "camelCase")]
    Windows { window_ids: Vec<u32> },

    /// Every window of one or more applications
    #[serde(rename_all = "camelCase")]
    Applications {
        bundle_ids: Vec<String>,
        display_id: Option<u32>,
    },

    /// Part of a display
    #[serde(rename_all = "camelCase")]
    Area { display_id: u32, rect: CaptureRect },

    /// System audio only
    AudioOnly,

    /// External capture device (e.g. a tethered phone or capture card)
    #[serde(rename_all = "camelCase")]
    ExternalDevice { device_id: String },

    /// A camera as the primary source
    #[serde(rename_all = "camelCase")]
    Camera { device_id: Option<String> },
}

/// Stream type of a session, derived from its target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StreamType {
    Screen,
    Window,
    MultiWindow,
    Application,
    ScreenArea,
    SystemAudio,
    ExternalDevice,
    Camera,
}

impl StreamType {
    /// Sessions without a video track
    pub fn is_audio_only(self) -> bool {
        self == StreamType::SystemAudio
    }

    /// Sessions captured through the screen capture stream
    pub fn uses_screen_capture(self) -> bool {
        !matches!(self, StreamType::ExternalDevice | StreamType::Camera)
    }

    /// Sessions whose capture stream can carry system audio
    pub fn supports_system_audio(self) -> bool {
        self.uses_screen_capture()
    }
}

impl fmt::Display for StreamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StreamType::Screen => "screen",
            StreamType::Window => "window",
            StreamType::MultiWindow => "multi-window",
            StreamType::Application => "application",
            StreamType::ScreenArea => "screen-area",
            StreamType::SystemAudio => "system-audio",
            StreamType::ExternalDevice => "external-device",
            StreamType::Camera => "camera",
        };
        f.write_str(name)
    }
}

impl CaptureTarget {
    /// Stream type for this target, or `None` when the target selects nothing
    pub fn stream_type(&self) -> Option<StreamType> {
        match self {
            CaptureTarget::Display { .. } => Some(StreamType::Screen),
            CaptureTarget::Windows { window_ids } => match window_ids.len() {
                0 => None,
                1 => Some(StreamType::Window),
                _ => Some(StreamType::MultiWindow),
            },
            CaptureTarget::Applications { bundle_ids, .. } if bundle_ids.is_empty() => None,
            CaptureTarget::Applications { .. } => Some(StreamType::Application),
            CaptureTarget::Area { rect, .. } if rect.width == 0 || rect.height == 0 => None,
            CaptureTarget::Area { .. } => Some(StreamType::ScreenArea),
            CaptureTarget::AudioOnly => Some(StreamType::SystemAudio),
            CaptureTarget::ExternalDevice { .. } => Some(StreamType::ExternalDevice),
            CaptureTarget::Camera { .. } => Some(StreamType::Camera),
        }
    }

    /// Parse the command-line target syntax:
    /// `display:<id>`, `window:<id>[,<id>...]`, `app:<bundle>[,<bundle>...]`,
    /// `area:<display>:<x>,<y>,<w>,<h>`, `audio`, `camera[:<device>]`,
    /// `device:<id>`
    pub fn parse(spec: &str) -> Option<Self> {
        let (kind, rest) = match spec.split_once(':') {
            Some((kind, rest)) => (kind, Some(rest)),
            None => (spec, None),
        };

        match (kind, rest) {
            ("display", Some(id)) => Some(CaptureTarget::Display {
                display_id: id.parse().ok()?,
            }),
            ("window", Some(ids)) => {
                let window_ids = ids
                    .split(',')
                    .map(|id| id.trim().parse().ok())
                    .collect::<Option<Vec<u32>>>()?;
                Some(CaptureTarget::Windows { window_ids })
            }
            ("app", Some(ids)) => Some(CaptureTarget::Applications {
                bundle_ids: ids.split(',').map(|s| s.trim().to_string()).collect(),
                display_id: None,
            }),
            ("area", Some(rest)) => {
                let (display, rect) = rest.split_once(':')?;
                let parts = rect
                    .split(',')
                    .map(|p| p.trim().parse().ok())
                    .collect::<Option<Vec<u32>>>()?;
                let [x, y, width, height] = parts.as_slice() else {
                    return None;
                };
                Some(CaptureTarget::Area {
                    display_id: display.parse().ok()?,
                    rect: CaptureRect {
                        x: *x,
                        y: *y,
                        width: *width,
                        height: *height,
                    },
                })
            }
            ("audio", None) => Some(CaptureTarget::AudioOnly),
            ("camera", device) => Some(CaptureTarget::Camera {
                device_id: device.map(str::to_string),
            }),
            ("device", Some(id)) => Some(CaptureTarget::ExternalDevice {
                device_id: id.to_string(),
            }),
            _ => None,
        }
    }
}

/// A target after resolution against the live system
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub target: CaptureTarget,
    pub stream_type: StreamType,
    /// Capture surface size in pixels
    pub width: u32,
    pub height: u32,
    /// Display the capture stream is bound to, for screen-based targets
    pub display_id: Option<u32>,
}

impl ResolvedTarget {
    pub fn needs_screen_permission(&self) -> bool {
        self.stream_type.uses_screen_capture()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rect_fits_within_surface() {
        let rect = CaptureRect { x: 100, y: 50, width: 1820, height: 1030 };
        assert!(rect.fits_within(1920, 1080));
        assert!(!rect.fits_within(1919, 1080));
        assert!(!rect.fits_within(1920, 1079));
    }

    #[test]
    fn test_rect_overflowing_coordinates_do_not_fit() {
        let rect = CaptureRect { x: u32::MAX, y: 0, width: 2, height: 10 };
        assert!(!rect.fits_within(u32::MAX, u32::MAX));
        let rect = CaptureRect { x: 0, y: 1, width: 10, height: u32::MAX };
        assert!(!rect.fits_within(u32::MAX, u32::MAX));
    }

    #[test]
    fn test_stream_type_from_target() {
        assert_eq!(
            CaptureTarget::Windows { window_ids: vec![7] }.stream_type(),
            Some(StreamType::Window)
        );
        assert_eq!(
            CaptureTarget::Windows { window_ids: vec![7, 8] }.stream_type(),
            Some(StreamType::MultiWindow)
        );
        assert_eq!(CaptureTarget::Windows { window_ids: vec![] }.stream_type(), None);
        assert_eq!(
            CaptureTarget::AudioOnly.stream_type(),
            Some(StreamType::SystemAudio)
        );
    }

    #[test]
    fn test_parse_targets() {
        assert_eq!(
            CaptureTarget::parse("display:0"),
            Some(CaptureTarget::Display { display_id: 0 })
        );
        assert_eq!(
            CaptureTarget::parse("window:12,13"),
            Some(CaptureTarget::Windows { window_ids: vec![12, 13] })
        );
        assert_eq!(
            CaptureTarget::parse("area:1:10,20,640,480"),
            Some(CaptureTarget::Area {
                display_id: 1,
                rect: CaptureRect { x: 10, y: 20, width: 640, height: 480 },
            })
        );
        assert_eq!(
            CaptureTarget::parse("camera"),
            Some(CaptureTarget::Camera { device_id: None })
        );
        assert_eq!(CaptureTarget::parse("area:1:10,20"), None);
        assert_eq!(CaptureTarget::parse("bogus"), None);
    }

    #[test]
    fn test_target_json_shape() {
        let json = serde_json::to_value(CaptureTarget::Display { display_id: 3 }).unwrap();
        assert_eq!(json["type"], "display");
        assert_eq!(json["displayId"], 3);
    }
}
