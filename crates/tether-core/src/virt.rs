//! Guest and hypervisor id canonicalization.
//!
//! Virtualization agents report guest VM identifiers with inconsistent
//! casing, and some hypervisors report the first three groups of a UUID
//! in swapped byte order. Both respellings must compare equal when
//! diffing topology, so ids are reduced to a single canonical form:
//! lowercase, and for UUID-shaped ids the lexicographically smaller of
//! the two byte orders (the swap is an involution, so both spellings
//! agree on the result).

/// Lowercased, canonical form of a reported guest id.
///
/// Returns `None` for empty ids, which check-in reports drop.
pub fn canonical_guest_id(reported: &str) -> Option<String> {
    if reported.is_empty() {
        return None;
    }

    let lower = reported.to_lowercase();
    if !is_uuid(&lower) {
        return Some(lower);
    }

    let swapped = swap_uuid_endianness(&lower);
    Some(if swapped < lower { swapped } else { lower })
}

/// Lowercased form of a reported hypervisor id; `None` when empty.
pub fn canonical_hypervisor_id(reported: &str) -> Option<String> {
    if reported.is_empty() {
        None
    } else {
        Some(reported.to_lowercase())
    }
}

/// Both lowercase spellings of a guest id, for storage lookups that
/// must match rows written before canonicalization.
pub fn possible_guest_ids(reported: &str) -> Vec<String> {
    let lower = reported.to_lowercase();
    let mut ids = vec![lower.clone()];
    if is_uuid(&lower) {
        let swapped = swap_uuid_endianness(&lower);
        if swapped != lower {
            ids.push(swapped);
        }
    }
    ids
}

/// The documented alternate spelling of a UUID: the first three groups
/// with their byte pairs reversed. Involutive. Non-UUID input is
/// returned unchanged.
pub fn swap_uuid_endianness(id: &str) -> String {
    let groups: Vec<&str> = id.split('-').collect();
    if groups.len() != 5 {
        return id.to_string();
    }

    let mut out: Vec<String> = Vec::with_capacity(5);
    for (i, group) in groups.iter().enumerate() {
        if i < 3 {
            out.push(reverse_byte_pairs(group));
        } else {
            out.push((*group).to_string());
        }
    }
    out.join("-")
}

/// Whether the string is shaped like a UUID (8-4-4-4-12 hex groups).
pub fn is_uuid(id: &str) -> bool {
    let groups: Vec<&str> = id.split('-').collect();
    if groups.len() != 5 {
        return false;
    }
    const LENGTHS: [usize; 5] = [8, 4, 4, 4, 12];
    groups
        .iter()
        .zip(LENGTHS)
        .all(|(g, len)| g.len() == len && g.chars().all(|c| c.is_ascii_hexdigit()))
}

/// Reverse the two-character byte pairs of a hex group. Odd-length
/// input is zero-padded on the left first.
fn reverse_byte_pairs(group: &str) -> String {
    let mut chars: Vec<char> = group.chars().collect();
    if chars.len() % 2 != 0 {
        chars.insert(0, '0');
    }

    let mut out = String::with_capacity(chars.len());
    for pair in chars.chunks(2).rev() {
        out.extend(pair);
    }
    out
}
