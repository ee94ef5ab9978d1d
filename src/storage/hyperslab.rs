use itertools::izip;

use crate::error::Error;

/// A rectangular region of a dataset: per axis a start offset and a count.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Region {
    pub offset: Vec<u64>,
    pub count: Vec<u64>,
}

impl Region {
    /// The full extent of `dims`.
    pub fn all(dims: &[u64]) -> Region {
        Region {
            offset: vec![0; dims.len()],
            count: dims.to_vec(),
        }
    }

    /// Region of a scalar dataset.
    pub fn scalar() -> Region {
        Region::default()
    }

    pub fn rank(&self) -> usize {
        self.count.len()
    }

    /// Number of elements covered. A rank-0 region covers one element.
    pub fn len(&self) -> u64 {
        self.count.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check that the region lies within `dims`.
    pub fn check(&self, dims: &[u64]) -> anyhow::Result<()> {
        ensure!(
            self.offset.len() == dims.len() && self.count.len() == dims.len(),
            "region of rank {} used on dataset of rank {}",
            self.rank(),
            dims.len()
        );

        for (axis, (o, c, d)) in izip!(&self.offset, &self.count, dims).enumerate() {
            if o + c > *d {
                return Err(Error::IndexOutOfBounds {
                    axis,
                    index: o + c - 1,
                    extent: *d,
                }
                .into());
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn len() {
        assert_eq!(Region::scalar().len(), 1);
        assert_eq!(Region::all(&[2, 3]).len(), 6);
        assert!(Region::all(&[0, 4]).is_empty());
    }

    #[test]
    fn out_of_bounds() {
        let r = Region {
            offset: vec![2],
            count: vec![2],
        };
        let e = r.check(&[3]).unwrap_err();
        assert_eq!(
            e.downcast_ref::<Error>(),
            Some(&Error::IndexOutOfBounds {
                axis: 0,
                index: 3,
                extent: 3
            })
        );
        assert!(r.check(&[4]).is_ok());
    }
}
