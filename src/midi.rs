//! MIDI formatting helpers for log and terminal output
//!
//! The bridge forwards bytes untouched; these helpers only describe them.

/// Format MIDI bytes as a hex string
pub fn format_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Short human-readable description of a raw MIDI message
pub fn describe(data: &[u8]) -> Option<String> {
    let status = *data.first()?;
    if status < 0x80 {
        return None;
    }

    let ch = (status & 0x0F) + 1;
    let d1 = data.get(1).copied();
    let d2 = data.get(2).copied();

    let text = match (status & 0xF0, d1, d2) {
        (0x80, Some(n), Some(v)) => format!("NoteOff ch:{} n:{} v:{}", ch, n, v),
        (0x90, Some(n), Some(0)) => format!("NoteOff ch:{} n:{} v:0", ch, n),
        (0x90, Some(n), Some(v)) => format!("NoteOn ch:{} n:{} v:{}", ch, n, v),
        (0xA0, Some(n), Some(p)) => format!("PolyPressure ch:{} n:{} p:{}", ch, n, p),
        (0xB0, Some(cc), Some(v)) => format!("CC ch:{} cc:{} v:{}", ch, cc, v),
        (0xC0, Some(p), _) => format!("ProgramChange ch:{} p:{}", ch, p),
        (0xD0, Some(p), _) => format!("ChannelPressure ch:{} p:{}", ch, p),
        (0xE0, Some(lsb), Some(msb)) => {
            format!("PitchBend ch:{} v:{}", ch, ((msb as u16) << 7) | lsb as u16)
        },
        (0xF0, _, _) => match status {
            0xF0 => format!("SysEx {} bytes", data.len()),
            0xF8 => "TimingClock".to_string(),
            0xFA => "Start".to_string(),
            0xFB => "Continue".to_string(),
            0xFC => "Stop".to_string(),
            0xFE => "ActiveSensing".to_string(),
            0xFF => "SystemReset".to_string(),
            other => format!("System 0x{:02X}", other),
        },
        _ => return None,
    };
    Some(text)
}

/// One line for terminal output: `PORT | HEX => DESCRIPTION`
pub fn format_message(port: &str, data: &[u8]) -> String {
    let message = describe(data)
        .map(|m| format!(" => {}", m))
        .unwrap_or_default();
    format!("{} | {}{}", port, format_hex(data), message)
}

/// Parse bytes typed as hex (`90 40 40`) or decimal with a `#` prefix (`#144`)
pub fn parse_bytes<'a>(tokens: impl IntoIterator<Item = &'a str>) -> Result<Vec<u8>, String> {
    tokens
        .into_iter()
        .map(|token| {
            let parsed = match token.strip_prefix('#') {
                Some(dec) => dec.parse::<u8>(),
                None => u8::from_str_radix(token.trim_start_matches("0x"), 16),
            };
            parsed.map_err(|_| format!("invalid byte '{}'", token))
        })
        .collect()
}
