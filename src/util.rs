//! Small helpers shared by the workflows: the `--rows` range parser and the
//! Windows line-ending copy the robot PC sometimes needs.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{FluentError, Result};

/// Expand a row-selection spec into explicit row numbers.
///
/// `"all"` selects everything (`None`); otherwise a comma list of numbers
/// and `lo-hi` ranges, e.g. `"1,3,5-6"` -> `[1, 3, 5, 6]`. With
/// `zero_index` the 1-indexed user values shift down by one; a resulting
/// negative is an error.
pub fn make_range(spec: &str, zero_index: bool) -> Result<Option<Vec<usize>>> {
    let spec = spec.trim();
    if spec.eq_ignore_ascii_case("all") {
        return Ok(None);
    }
    let bad = || FluentError::BadRowRange(spec.to_string());

    let mut rows: Vec<i64> = Vec::new();
    for part in spec.split(',') {
        let bounds: Vec<&str> = part.split('-').collect();
        match bounds.as_slice() {
            [single] => rows.push(single.trim().parse().map_err(|_| bad())?),
            [lo, hi] => {
                let lo: i64 = lo.trim().parse().map_err(|_| bad())?;
                let hi: i64 = hi.trim().parse().map_err(|_| bad())?;
                if hi < lo {
                    return Err(bad());
                }
                rows.extend(lo..=hi);
            }
            _ => return Err(bad()),
        }
    }
    if zero_index {
        rows.iter_mut().for_each(|r| *r -= 1);
    }
    if rows.iter().any(|&r| r < 0) {
        return Err(bad());
    }
    Ok(Some(rows.into_iter().map(|r| r as usize).collect()))
}

/// Write a CRLF copy of a text file next to the original, suffixing the
/// file stem with `_win`. Returns the new path.
pub fn to_win(path: &Path) -> Result<PathBuf> {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output");
    let mut name = format!("{stem}_win");
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        name.push('.');
        name.push_str(ext);
    }
    let out = path.with_file_name(name);

    let text = fs::read_to_string(path)?;
    let crlf = text.replace("\r\n", "\n").replace('\n', "\r\n");
    fs::write(&out, crlf)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn all_selects_everything() {
        assert_eq!(make_range("all", true).unwrap(), None);
        assert_eq!(make_range("ALL", false).unwrap(), None);
    }

    #[test]
    fn lists_and_ranges_expand() {
        assert_eq!(
            make_range("1,3,5-6", false).unwrap(),
            Some(vec![1, 3, 5, 6])
        );
        assert_eq!(
            make_range("1-4", true).unwrap(),
            Some(vec![0, 1, 2, 3])
        );
    }

    #[test]
    fn bad_specs_are_rejected() {
        assert!(make_range("1,x", false).is_err());
        assert!(make_range("5-2", false).is_err());
        assert!(make_range("1-2-3", false).is_err());
        // zero-indexing row 0 would go negative
        assert!(make_range("0,1", true).is_err());
    }

    #[test]
    fn to_win_writes_a_crlf_sibling() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("run.gwl");
        let mut f = fs::File::create(&p).unwrap();
        writeln!(f, "A;x;;;1;;5;lc;;").unwrap();
        writeln!(f, "W;").unwrap();
        drop(f);

        let win = to_win(&p).unwrap();
        assert_eq!(win.file_name().unwrap(), "run_win.gwl");
        let text = fs::read_to_string(win).unwrap();
        assert_eq!(text, "A;x;;;1;;5;lc;;\r\nW;\r\n");
    }
}
