//! Per-document archive of modification state
//!
//! Layout (little endian):
//!
//! ```text
//! i64            number of modifications
//! repeated:
//!   utf-8 bytes  persistent id
//!   0x00         terminator
//!   u8           dimmed flag (0 or 1)
//! ```
//!
//! Processed audio is not archived; only the dimmed state survives a reload.

use std::io::{self, BufRead, Write};

use super::{DocumentGraph, ModificationId};

/// Write every modification of `graph`
///
/// `progress` receives values in `0.0..=1.0`.
pub fn store_objects<W: Write>(
    graph: &DocumentGraph,
    writer: &mut W,
    mut progress: impl FnMut(f32),
) -> io::Result<()> {
    let modifications: Vec<_> = graph.modifications().collect();
    let total = modifications.len();
    writer.write_all(&(total as i64).to_le_bytes())?;

    for (index, modification) in modifications.iter().enumerate() {
        progress(index as f32 / total as f32);
        let id = modification.persistent_id();
        if id.as_bytes().contains(&0) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("persistent id {:?} contains a NUL byte", id),
            ));
        }
        writer.write_all(id.as_bytes())?;
        writer.write_all(&[0])?;
        writer.write_all(&[modification.is_dimmed() as u8])?;
    }

    progress(1.0);
    log::debug!("store_objects: wrote {} modifications", total);
    Ok(())
}

/// Apply archived state to the modifications of `graph`
///
/// Returns the modifications whose dimmed state changed; their content
/// version has been bumped so renderers pick the change up. Entries whose
/// persistent id is not in the document are skipped.
pub fn restore_objects<R: BufRead>(
    graph: &DocumentGraph,
    reader: &mut R,
    mut progress: impl FnMut(f32),
) -> io::Result<Vec<ModificationId>> {
    let mut count = [0u8; 8];
    reader.read_exact(&mut count)?;
    let count = i64::from_le_bytes(count);
    if count < 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("negative modification count {}", count),
        ));
    }

    let mut changed = Vec::new();
    let mut id_bytes = Vec::new();
    for index in 0..count {
        progress(index as f32 / count as f32);

        id_bytes.clear();
        reader.read_until(0, &mut id_bytes)?;
        if id_bytes.pop() != Some(0) {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        let persistent_id = String::from_utf8(id_bytes.clone())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        let mut dimmed = [0u8; 1];
        reader.read_exact(&mut dimmed)?;
        let dimmed = dimmed[0] != 0;

        match graph.find_modification(&persistent_id) {
            Some(modification) => {
                if modification.set_dimmed(dimmed) {
                    changed.push(modification.id());
                }
            }
            None => log::warn!("restore_objects: no modification with id '{}'", persistent_id),
        }
    }

    progress(1.0);
    log::info!(
        "restore_objects: restored {} entries, {} changed",
        count,
        changed.len()
    );
    Ok(changed)
}
