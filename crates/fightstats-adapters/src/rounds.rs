//! Per-round statistics out of the flat `p.b-fight-details__table-text` cells.
//!
//! The fight page lays out a totals table (20 cells) followed by one 20-cell
//! block per round, then a significant-strikes totals table (18 cells) followed
//! by one 18-cell block per round. Each column holds fighter 0 then fighter 1.

use fightstats_core::NULL;

use crate::AdapterError;

/// Cell offsets `(general, striking)` of `fighter` in `round`.
pub fn shifts(fighter: usize, round: u32, total_rounds: u32) -> Result<(usize, usize), AdapterError> {
    if fighter > 1 {
        return Err(AdapterError::FighterIndex(fighter));
    }
    let round = round as usize;
    let total = total_rounds as usize;
    let general = 20 * round + fighter;
    let striking = 20 * (total + 1) + 18 * round + fighter;
    Ok((general, striking))
}

fn cell(cells: &[String], index: usize) -> Option<&str> {
    cells.get(index).map(|c| c.trim())
}

/// `"X of Y"` as `(attempted, succeeded)`.
fn landed_of(cells: &[String], index: usize) -> Option<(String, String)> {
    let text = cell(cells, index)?;
    let mut parts = text.split(" of ");
    let succeeded = parts.next()?.trim().to_string();
    let attempted = parts.next()?.trim().to_string();
    Some((attempted, succeeded))
}

fn decode(cells: &[String], general: usize, striking: usize) -> Option<[String; 22]> {
    let mut out: Vec<String> = Vec::with_capacity(22);

    out.push(cell(cells, general + 2)?.to_string());
    // significant, head, body, leg, distance, ground, clinch
    for offset in [2, 6, 8, 10, 12, 16, 14] {
        let (att, succ) = landed_of(cells, striking + offset)?;
        out.push(att);
        out.push(succ);
    }
    // total strikes, takedowns
    for offset in [8, 10] {
        let (att, succ) = landed_of(cells, general + offset)?;
        out.push(att);
        out.push(succ);
    }
    for offset in [14, 16, 18] {
        out.push(cell(cells, general + offset)?.to_string());
    }

    out.try_into().ok()
}

/// Decode one fighter's round; any missing or malformed cell yields all `NULL`.
pub fn decode_round(
    cells: &[String],
    fighter: usize,
    round: u32,
    total_rounds: u32,
) -> Result<[String; 22], AdapterError> {
    let (general, striking) = shifts(fighter, round, total_rounds)?;
    Ok(decode(cells, general, striking).unwrap_or_else(|| std::array::from_fn(|_| NULL.to_string())))
}
