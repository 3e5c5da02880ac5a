use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

/// Compass position of an overlay inside its container.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Anchor {
    #[default]
    TopLeft,
    TopRight,
    TopCenter,
    Center,
    LeftCenter,
    RightCenter,
    BottomLeft,
    BottomRight,
    BottomCenter,
}

impl Anchor {
    pub const ALL: [Anchor; 9] = [
        Anchor::TopLeft,
        Anchor::TopRight,
        Anchor::TopCenter,
        Anchor::Center,
        Anchor::LeftCenter,
        Anchor::RightCenter,
        Anchor::BottomLeft,
        Anchor::BottomRight,
        Anchor::BottomCenter,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Anchor::TopLeft => "top-left",
            Anchor::TopRight => "top-right",
            Anchor::TopCenter => "top-center",
            Anchor::Center => "center",
            Anchor::LeftCenter => "left-center",
            Anchor::RightCenter => "right-center",
            Anchor::BottomLeft => "bottom-left",
            Anchor::BottomRight => "bottom-right",
            Anchor::BottomCenter => "bottom-center",
        }
    }

    /// Top-left coordinate of an `overlay` sized box inside `container`.
    ///
    /// Results may be negative when the overlay is larger than the container.
    pub fn place(self, container: (u32, u32), overlay: (u32, u32), padding: u32) -> (i64, i64) {
        let (cw, ch) = (i64::from(container.0), i64::from(container.1));
        let (ow, oh) = (i64::from(overlay.0), i64::from(overlay.1));
        let pad = i64::from(padding);

        // `/` on i64 truncates toward zero.
        let center_x = (cw - ow) / 2;
        let center_y = (ch - oh) / 2;
        let right = cw - ow - pad;
        let bottom = ch - oh - pad;

        match self {
            Anchor::TopRight => (right, pad),
            Anchor::TopCenter => (center_x, pad),
            Anchor::Center => (center_x, center_y),
            Anchor::LeftCenter => (pad, center_y),
            Anchor::RightCenter => (right, center_y),
            Anchor::BottomLeft => (pad, bottom),
            Anchor::BottomRight => (right, bottom),
            Anchor::BottomCenter => (center_x, bottom),
            Anchor::TopLeft => (pad, pad),
        }
    }
}

impl FromStr for Anchor {
    type Err = Infallible;

    /// Unknown tags fall back to top-left.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();
        Ok(Anchor::ALL
            .into_iter()
            .find(|anchor| anchor.as_str().eq_ignore_ascii_case(value))
            .unwrap_or_default())
    }
}

impl From<String> for Anchor {
    fn from(value: String) -> Self {
        value.parse::<Anchor>().unwrap_or_default()
    }
}

impl fmt::Display for Anchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
