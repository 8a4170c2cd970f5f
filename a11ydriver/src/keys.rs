//! Character to X keysym mapping for keyboard synthesis.

/// Keysym for a character, including the WebDriver private-use key codes.
pub fn keysym_for_char(ch: char) -> u32 {
    match ch {
        '\u{E003}' | '\u{8}' => 0xff08,  // BackSpace
        '\u{E004}' | '\t' => 0xff09,     // Tab
        '\u{E006}' | '\n' | '\r' => 0xff0d, // Return
        '\u{E007}' => 0xff8d,            // KP_Enter
        '\u{E008}' => 0xffe1,            // Shift_L
        '\u{E009}' => 0xffe3,            // Control_L
        '\u{E00A}' => 0xffe9,            // Alt_L
        '\u{E00C}' | '\u{1b}' => 0xff1b, // Escape
        '\u{E00D}' => 0x0020,            // space
        '\u{E00E}' => 0xff55,            // Page_Up
        '\u{E00F}' => 0xff56,            // Page_Down
        '\u{E010}' => 0xff57,            // End
        '\u{E011}' => 0xff50,            // Home
        '\u{E012}' => 0xff51,            // Left
        '\u{E013}' => 0xff52,            // Up
        '\u{E014}' => 0xff53,            // Right
        '\u{E015}' => 0xff54,            // Down
        '\u{E017}' | '\u{7f}' => 0xffff, // Delete
        '\u{E03D}' => 0xffeb,            // Super_L
        c => {
            let code = c as u32;
            // Latin-1 keysyms equal their code points.
            if (0x20..=0x7e).contains(&code) || (0xa0..=0xff).contains(&code) {
                code
            } else {
                0x0100_0000 | code
            }
        }
    }
}
