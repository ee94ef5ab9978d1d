use crate::types::Datatype;

/// Byte order of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    BE,
    LE,
}

impl Order {
    pub fn native() -> Order {
        if cfg!(target_endian = "little") {
            Order::LE
        } else {
            Order::BE
        }
    }
}

/// Reverse the bytes of every numeric leaf of `dtype` in `buf`, which holds consecutive elements.
pub fn swap_leaves(dtype: &Datatype, buf: &mut [u8]) {
    let sz = dtype.dsize();
    if sz == 0 {
        return;
    }

    for el in buf.chunks_exact_mut(sz) {
        swap_element(dtype, el);
    }
}

fn swap_element(dtype: &Datatype, el: &mut [u8]) {
    match dtype {
        Datatype::UInt(_) | Datatype::Int(_) | Datatype::Float(_) => el.reverse(),
        Datatype::Compound(c) => {
            for f in &c.fields {
                let n = f.ty.dsize();
                swap_element(&f.ty, &mut el[f.offset..f.offset + n]);
            }
        }
        Datatype::Array(base, _) => swap_leaves(base, el),
        Datatype::FixedStr(_) | Datatype::VarLenStr | Datatype::Custom(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CompoundType;

    #[test]
    fn swap_compound() {
        let dt = Datatype::Compound(CompoundType::packed([
            ("a", Datatype::UInt(2)),
            ("b", Datatype::Array(Box::new(Datatype::Int(4)), vec![2])),
            ("c", Datatype::FixedStr(2)),
        ]));

        let mut b = vec![1, 2, 0, 0, 0, 1, 0, 0, 0, 2, b'h', b'i'];
        swap_leaves(&dt, &mut b);
        assert_eq!(b, vec![2, 1, 1, 0, 0, 0, 2, 0, 0, 0, b'h', b'i']);
    }
}
