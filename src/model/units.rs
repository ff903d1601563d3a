use crate::error::{Error, Result};

/// Parses a byte size such as "512MiB", "2GB" or "1048576"
pub fn parse_byte_size(input: &str) -> Result<u64> {
    let input = input.trim();
    if input.is_empty() {
        return Err(Error::bad_request("Empty size value"));
    }

    let split = input
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(input.len());
    let (number, suffix) = input.split_at(split);
    let value: u64 = number
        .parse()
        .map_err(|_| Error::bad_request(format!("Invalid size value {:?}", input)))?;

    let multiplier: u64 = match suffix.trim() {
        "" | "B" => 1,
        "kB" => 1_000,
        "MB" => 1_000_000,
        "GB" => 1_000_000_000,
        "TB" => 1_000_000_000_000,
        "PB" => 1_000_000_000_000_000,
        "KiB" => 1 << 10,
        "MiB" => 1 << 20,
        "GiB" => 1 << 30,
        "TiB" => 1 << 40,
        "PiB" => 1 << 50,
        other => {
            return Err(Error::bad_request(format!(
                "Invalid size suffix {:?} in {:?}",
                other, input
            )))
        }
    };

    value
        .checked_mul(multiplier)
        .ok_or_else(|| Error::bad_request(format!("Size value {:?} is too large", input)))
}

/// Counts the CPUs in a `limits.cpu` value: either a plain count ("4") or a
/// pinning set ("0-3,6").
pub fn parse_cpu_count(input: &str) -> Result<u64> {
    let input = input.trim();
    if let Ok(count) = input.parse::<u64>() {
        return Ok(count);
    }

    let invalid = || Error::bad_request(format!("Invalid CPU limit {:?}", input));
    let too_large = || Error::bad_request(format!("CPU limit {:?} is too large", input));

    let mut count: u64 = 0;
    for chunk in input.split(',') {
        let chunk = chunk.trim();
        let width = match chunk.split_once('-') {
            Some((lo, hi)) => {
                let lo: u64 = lo.trim().parse().map_err(|_| invalid())?;
                let hi: u64 = hi.trim().parse().map_err(|_| invalid())?;
                if hi < lo {
                    return Err(invalid());
                }
                (hi - lo).checked_add(1).ok_or_else(too_large)?
            }
            None => {
                chunk.parse::<u64>().map_err(|_| invalid())?;
                1
            }
        };
        count = count.checked_add(width).ok_or_else(too_large)?;
    }
    Ok(count)
}
