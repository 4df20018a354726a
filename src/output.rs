use anyhow::Result;
use std::io::Write;

/// Writes the vector as a single-line JSON array.
pub fn write_embedding(out: &mut impl Write, vector: &[f32]) -> Result<()> {
    serde_json::to_writer(&mut *out, vector)?;
    writeln!(out)?;
    out.flush()?;
    Ok(())
}

/// Writes `[]` and an `Error:` line. Best effort: stderr is the last channel left.
pub fn write_failure(err: &mut impl Write, error: &anyhow::Error) {
    let _ = writeln!(err, "[]");
    let _ = writeln!(err, "Error: {error:#}");
    let _ = err.flush();
}
