use std::io::Write;

pub const DEFAULT_WIDTH: usize = 32;
/// Default blank line spacing of the dumper, in bytes
pub const DEFAULT_BREAKS: usize = 1024;

fn printable(byte: u8) -> char {
    if byte.is_ascii_graphic() || byte == b' ' {
        byte as char
    } else {
        '.'
    }
}

/// Hex dump with a column header, offsets in decimal and hex, and a character column.
/// A blank line is written every `breaks` bytes when `breaks` is non-zero.
pub fn hexdump<W: Write>(out: &mut W, bytes: &[u8], width: usize, breaks: usize) -> std::io::Result<()> {
    let width = if width == 0 { DEFAULT_WIDTH } else { width };
    let wide = bytes.len() > 1024;

    write!(out, "{}", if wide { "  Dec  Hex" } else { " Dec Hex" })?;
    for j in 0..width {
        if j % 8 == 0 {
            write!(out, " ")?;
        }
        write!(out, "{:2x}", j & 0xf)?;
    }
    write!(out, "   ")?;
    for j in 0..width {
        if j & 0xf != 0 {
            write!(out, "{:x}", j & 0xf)?;
        } else {
            write!(out, " ")?;
        }
    }
    writeln!(out)?;

    for (line, chunk) in bytes.chunks(width).enumerate() {
        let pos = line * width;
        if breaks != 0 && pos != 0 && pos % breaks == 0 {
            writeln!(out)?;
        }
        if wide {
            write!(out, "{pos:5} {pos:04x}")?;
        } else {
            write!(out, "{pos:4} {pos:03x}")?;
        }
        for j in 0..width {
            if j % 8 == 0 {
                write!(out, " ")?;
            }
            match chunk.get(j) {
                Some(b) => write!(out, "{b:02x}")?,
                None => write!(out, "  ")?,
            }
        }
        write!(out, "   ")?;
        let text: String = chunk.iter().map(|&b| printable(b)).collect();
        writeln!(out, "{text}")?;
    }
    Ok(())
}

/// Render seconds since the epoch like `ctime(3)` in UTC, without the newline
pub fn format_time(secs: i32) -> String {
    const DAYS: [&str; 7] = ["Thu", "Fri", "Sat", "Sun", "Mon", "Tue", "Wed"];
    const MONTHS: [&str; 12] = [
        "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
    ];
    let secs = secs as i64;
    let days = secs.div_euclid(86400);
    let rest = secs.rem_euclid(86400);
    let (year, month, day) = civil_from_days(days);
    format!(
        "{} {} {:2} {:02}:{:02}:{:02} {}",
        DAYS[days.rem_euclid(7) as usize],
        MONTHS[(month - 1) as usize],
        day,
        rest / 3600,
        rest % 3600 / 60,
        rest % 60,
        year
    )
}

/// Proleptic Gregorian date of a day count since 1970-01-01
fn civil_from_days(days: i64) -> (i64, i64, i64) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = yoe + era * 400 + if month <= 2 { 1 } else { 0 };
    (year, month, day)
}

/// Seconds since the epoch, clamped to the on-disk 32-bit field
pub fn now() -> i32 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs().min(i32::MAX as u64) as i32)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_dump() {
        let mut out = Vec::new();
        hexdump(&mut out, b"Hello, world!\x00\x01\x02", 8, 0).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq![lines[0], " Dec Hex  0 1 2 3 4 5 6 7    1234567"];
        assert_eq![lines[1], "   0 000 48656c6c6f2c2077   Hello, w"];
        assert_eq![lines[2], "   8 008 6f726c6421000102   orld!..."];
        assert_eq![lines.len(), 3];
    }

    #[test]
    fn padding_and_breaks() {
        let mut out = Vec::new();
        hexdump(&mut out, &[0xffu8; 20], 16, 16).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq![lines[2], ""];
        assert![lines[3].starts_with("  16 010 ffffffff")];
        assert![lines[3].ends_with("   ....")];
    }

    #[test]
    fn wide_prefix() {
        let mut out = Vec::new();
        hexdump(&mut out, &[0u8; 2048], 32, 0).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert![text.starts_with("  Dec  Hex")];
        assert![text.contains("\n 2016 07e0 ")];
    }

    #[test]
    fn ctime_format() {
        assert_eq![format_time(0), "Thu Jan  1 00:00:00 1970"];
        assert_eq![format_time(951_782_400), "Tue Feb 29 00:00:00 2000"];
        assert_eq![format_time(1_234_567_890), "Fri Feb 13 23:31:30 2009"];
    }
}
