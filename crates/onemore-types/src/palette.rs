/// Card colors, indexed by a participant's color index (wrapping).
pub const PALETTE: [&str; 12] = [
    "#007AFF", "#AF52DE", "#FF2D55", "#FF9500", "#FFCC00", "#FFD700",
    "#32CD32", "#00CED1", "#D2691E", "#708090", "#000080", "#FF1493",
];

pub fn color_for(index: u32) -> &'static str {
    PALETTE[index as usize % PALETTE.len()]
}

/// Black or white, whichever reads better on top of `background` (`#RRGGBB`).
/// Malformed input is treated as black.
pub fn text_color_for(background: &str) -> &'static str {
    let hex = background.trim_start_matches('#');
    let channel = |i: usize| {
        hex.get(i..i + 2)
            .and_then(|s| u8::from_str_radix(s, 16).ok())
            .unwrap_or(0) as f64
    };
    let luminance = (0.299 * channel(0) + 0.587 * channel(2) + 0.114 * channel(4)) / 255.0;
    if luminance > 0.5 { "#000000" } else { "#FFFFFF" }
}
