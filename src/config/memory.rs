/// Parse a memory quantity such as `"2G"`, `"512M"`, `"100k"` or `"1048576"`
///
/// Suffixes are binary multiples and case-insensitive; a trailing `B` or `iB`
/// is accepted (`"2GB"`, `"2GiB"`). The result must be a positive byte count.
pub fn parse_memory(input: &str) -> std::result::Result<u64, String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err("empty quantity".to_string());
    }

    let split = trimmed
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(trimmed.len());
    let (number, suffix) = trimmed.split_at(split);

    if number.is_empty() {
        return Err(format!("'{}' does not start with a number", input));
    }

    let suffix = suffix.trim().to_ascii_uppercase();
    let unit = suffix
        .strip_suffix("IB")
        .or_else(|| suffix.strip_suffix('B'))
        .unwrap_or(&suffix);

    let multiplier: u64 = match unit {
        "" => 1,
        "K" => 1024,
        "M" => 1024 * 1024,
        "G" => 1024 * 1024 * 1024,
        "T" => 1024 * 1024 * 1024 * 1024,
        other => return Err(format!("unknown unit '{}'", other)),
    };

    let bytes = if number.contains('.') {
        let value: f64 = number
            .parse()
            .map_err(|_| format!("'{}' is not a number", number))?;
        (value * multiplier as f64).round() as u64
    } else {
        let value: u64 = number
            .parse()
            .map_err(|_| format!("'{}' is not a number", number))?;
        value
            .checked_mul(multiplier)
            .ok_or_else(|| format!("'{}' is too large", input))?
    };

    if bytes == 0 {
        return Err("must be a positive quantity".to_string());
    }

    Ok(bytes)
}
