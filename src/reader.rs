//! Typed access to array payloads
//!
//! Payloads are row-major: the last dimension varies fastest. A selection is
//! one ordered index list per dimension; it is flattened into runs of
//! consecutive elements, and each run becomes a single block store range
//! read. Positions past the appended data read as zero (or as the empty
//! string).

use crate::array::{ArrayClass, ArrayData, ElemType, TypedArray, COUNT_TO_END};
use crate::attribute::{Attributes, LEVELS};
use crate::error::{GdsError, Result};
use crate::node::ArrayNode;
use crate::store::StoreBackend;

/// Borrowed view of one array node for a read
pub(crate) struct ArrayView<'a> {
    pub path: &'a str,
    pub array: &'a ArrayNode,
    pub attributes: &'a Attributes,
    pub backend: &'a StoreBackend,
}

impl<'a> ArrayView<'a> {
    /// Contiguous hyper-rectangle read; a [`COUNT_TO_END`] count reads the
    /// rest of its dimension
    pub fn read(
        &self,
        start: Option<&[u64]>,
        count: Option<&[u64]>,
        convert: Option<ElemType>,
    ) -> Result<TypedArray> {
        let dim = &self.array.dim;
        let rank = dim.len();

        let start: Vec<u64> = match start {
            Some(s) => s.to_vec(),
            None => vec![0; rank],
        };
        if start.len() != rank {
            return Err(GdsError::dim_mismatch(
                self.path,
                format!("start has {} entries, node has {} dimensions", start.len(), rank),
            ));
        }
        let count: Vec<u64> = match count {
            Some(c) if c.len() != rank => {
                return Err(GdsError::dim_mismatch(
                    self.path,
                    format!("count has {} entries, node has {} dimensions", c.len(), rank),
                ))
            }
            Some(c) => c
                .iter()
                .zip(&start)
                .zip(dim)
                .map(|((&c, &s), &d)| if c == COUNT_TO_END { d.saturating_sub(s) } else { c })
                .collect(),
            None => dim.iter().zip(&start).map(|(d, s)| d.saturating_sub(*s)).collect(),
        };

        for (i, ((&s, &c), &d)) in start.iter().zip(&count).zip(dim).enumerate() {
            if s.checked_add(c).map_or(true, |end| end > d) {
                return Err(GdsError::out_of_range(
                    self.path,
                    format!(
                        "dimension {}: start {} + count {} exceeds extent {}",
                        i, s, c, d
                    ),
                ));
            }
        }

        self.check_conversion(convert)?;
        let selection: Vec<Vec<u64>> = start
            .iter()
            .zip(&count)
            .map(|(&s, &c)| (s..s + c).collect())
            .collect();
        self.read_selection(&selection, convert)
    }

    /// Boolean-mask read; the result is the cross-product of the selected
    /// indices in their original order
    pub fn read_selected(&self, masks: &[Vec<bool>], convert: Option<ElemType>) -> Result<TypedArray> {
        let dim = &self.array.dim;
        if masks.len() != dim.len() {
            return Err(GdsError::dim_mismatch(
                self.path,
                format!("{} masks given, node has {} dimensions", masks.len(), dim.len()),
            ));
        }
        for (i, (mask, &d)) in masks.iter().zip(dim).enumerate() {
            if mask.len() as u64 != d {
                return Err(GdsError::dim_mismatch(
                    self.path,
                    format!("mask {} has length {}, dimension extent is {}", i, mask.len(), d),
                ));
            }
        }

        self.check_conversion(convert)?;
        let selection: Vec<Vec<u64>> = masks
            .iter()
            .map(|mask| {
                mask.iter()
                    .enumerate()
                    .filter(|(_, keep)| **keep)
                    .map(|(i, _)| i as u64)
                    .collect()
            })
            .collect();
        self.read_selection(&selection, convert)
    }

    fn check_conversion(&self, convert: Option<ElemType>) -> Result<()> {
        match convert {
            Some(target) if target.is_string() != self.array.elem.is_string() => {
                Err(GdsError::UnsupportedConversion {
                    path: self.path.to_string(),
                    from: self.array.elem.as_str().to_string(),
                    to: target.as_str().to_string(),
                })
            }
            _ => Ok(()),
        }
    }

    fn read_selection(&self, selection: &[Vec<u64>], convert: Option<ElemType>) -> Result<TypedArray> {
        let shape: Vec<usize> = selection.iter().map(Vec::len).collect();
        let runs = self.runs(selection);

        let raw = match self.array.elem.size() {
            Some(size) => self.fetch_numeric(&runs, size)?,
            None => self.fetch_strings(&runs)?,
        };

        let data = match convert {
            Some(target) => raw.cast(target, self.path)?,
            None => match self.array.class {
                ArrayClass::Logical => raw.into_logical(self.path)?,
                ArrayClass::Factor => {
                    let levels = self
                        .attributes
                        .get(LEVELS)
                        .map(|v| v.string_list())
                        .unwrap_or_default();
                    raw.into_factor(&levels, self.path)?
                }
                _ => raw,
            },
        };

        Ok(TypedArray { dim: shape, data })
    }

    /// Flatten a selection into `(first element, length)` runs
    fn runs(&self, selection: &[Vec<u64>]) -> Vec<(u64, u64)> {
        let rank = selection.len();
        if selection.iter().any(Vec::is_empty) {
            return Vec::new();
        }

        let dim = &self.array.dim;
        let mut strides = vec![1u64; rank];
        for d in (0..rank.saturating_sub(1)).rev() {
            strides[d] = strides[d + 1] * dim[d + 1];
        }

        // Consecutive runs along the last dimension
        let mut last_runs: Vec<(u64, u64)> = Vec::new();
        for &i in &selection[rank - 1] {
            match last_runs.last_mut() {
                Some((first, len)) if *first + *len == i => *len += 1,
                _ => last_runs.push((i, 1)),
            }
        }

        let mut runs: Vec<(u64, u64)> = Vec::new();
        let mut cursor = vec![0usize; rank - 1];
        loop {
            let base: u64 = cursor
                .iter()
                .enumerate()
                .map(|(d, &p)| selection[d][p] * strides[d])
                .sum();
            for &(first, len) in &last_runs {
                let start = base + first;
                match runs.last_mut() {
                    Some((s, l)) if *s + *l == start => *l += len,
                    _ => runs.push((start, len)),
                }
            }

            // Odometer over the outer dimensions
            let mut d = rank - 1;
            loop {
                if d == 0 {
                    return runs;
                }
                d -= 1;
                cursor[d] += 1;
                if cursor[d] < selection[d].len() {
                    break;
                }
                cursor[d] = 0;
            }
        }
    }

    fn fetch_numeric(&self, runs: &[(u64, u64)], size: usize) -> Result<ArrayData> {
        let size = size as u64;
        let stored = self.array.len;
        let total: u64 = runs.iter().map(|(_, len)| len).sum();
        let mut bytes = Vec::with_capacity((total * size) as usize);

        for &(first, len) in runs {
            let available = stored.saturating_sub(first).min(len);
            if available > 0 {
                let chunk = self.array.store.read_range(
                    self.backend,
                    first * size,
                    available * size,
                )?;
                bytes.extend_from_slice(&chunk);
            }
            bytes.resize(bytes.len() + ((len - available) * size) as usize, 0);
        }

        ArrayData::decode(self.array.elem, &bytes)
    }

    /// Strings are variable-width, so each run is mapped through the
    /// string marks to the payload span covering it and only that span is
    /// decoded
    fn fetch_strings(&self, runs: &[(u64, u64)]) -> Result<ArrayData> {
        let array = self.array;
        let mut out = ArrayData::empty(array.elem);

        for &(first, len) in runs {
            let available = array.len.saturating_sub(first).min(len);
            if available > 0 {
                let (span_first, offset, bytes) = array.string_span(first, available)?;
                let payload = array.store.read_range(self.backend, offset, bytes)?;
                let span = ArrayData::decode(array.elem, &payload)?;

                let skip = (first - span_first) as usize;
                let take = available as usize;
                if span.len() < skip + take {
                    return Err(GdsError::CorruptData(format!(
                        "{}: string span at {} holds {} elements, expected at least {}",
                        self.path,
                        offset,
                        span.len(),
                        skip + take
                    )));
                }
                let indices: Vec<usize> = (skip..skip + take).collect();
                out.extend_strings(span.gather(&indices));
            }
            out.pad_strings(out.len() + (len - available) as usize);
        }

        Ok(out)
    }
}

/// Encode values for appending to `array`, returning the bytes and the
/// number of elements they hold
pub(crate) fn encode_values(array: &ArrayNode, data: ArrayData, path: &str) -> Result<(Vec<u8>, u64)> {
    let count = data.len() as u64;
    let converted = match data {
        ArrayData::Factor(_) => {
            return Err(GdsError::UnsupportedConversion {
                path: path.to_string(),
                from: String::from("factor"),
                to: array.elem.as_str().to_string(),
            })
        }
        other => other.cast(array.elem, path)?,
    };
    Ok((converted.encode(), count))
}
