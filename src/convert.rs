//! Generic numeric format conversion
//!
//! Converts buffers of items between any two machine representations
//! described by structure charts: integers of any byte size and order,
//! floating point numbers described by generic bit-level formats (with
//! arbitrary byte permutations and explicit or implicit high mantissa
//! bits), bit-packed primitives, and derived types converted member by
//! member under each side's alignment rules.
//!
//! All conversion is driven by data, never by host types: a number is a
//! sign bit, an exponent field, and a mantissa field at known bit
//! positions, moved field by field from one layout to the other. This is
//! what lets a file written on one machine be read bit-exactly on any
//! other.

use crate::chart::{is_indirect, Chart, Defstr};
use crate::error::{PdbError, PdbResult};
use crate::standard::{ByteOrder, FloatFormat};

/// Largest field moved in one packet.
const FIELD_BITS: usize = 64;

fn mask(nbits: usize) -> u64 {
    if nbits >= 64 {
        u64::MAX
    } else {
        (1u64 << nbits) - 1
    }
}

/// Extract `nbits` bits starting at logical bit `offs` from a stream of
/// `item_bytes`-byte items. With `order` present, logical byte `j` of each
/// item lives at physical index `order[j] - 1`; bit 0 is the most
/// significant bit of logical byte 0.
pub fn extract_field(
    src: &[u8],
    offs: usize,
    nbits: usize,
    item_bytes: usize,
    order: Option<&[u8]>,
) -> u64 {
    let mut field = 0u64;
    for bit in offs..offs + nbits {
        let byte_index = bit / 8;
        let phys = match order {
            Some(ord) => {
                let item = byte_index / item_bytes;
                item * item_bytes + (ord[byte_index % item_bytes] as usize - 1)
            }
            None => byte_index,
        };
        let b = (src[phys] >> (7 - bit % 8)) & 1;
        field = (field << 1) | b as u64;
    }
    field
}

/// Insert the low `nbits` bits of `value` at bit `offs` of a normal-order
/// buffer.
pub fn insert_field(value: u64, nbits: usize, dst: &mut [u8], offs: usize) {
    for i in 0..nbits {
        let pos = offs + i;
        let bit_mask = 0x80u8 >> (pos % 8);
        if (value >> (nbits - 1 - i)) & 1 != 0 {
            dst[pos / 8] |= bit_mask;
        } else {
            dst[pos / 8] &= !bit_mask;
        }
    }
}

fn set_bit(dst: &mut [u8], pos: usize) {
    dst[pos / 8] |= 0x80u8 >> (pos % 8);
}

fn is_normal(order: &[u8]) -> bool {
    order.iter().enumerate().all(|(i, &b)| b as usize == i + 1)
}

/// Permute each item of a normal-order buffer into `order`: output
/// physical byte `order[j] - 1` receives logical byte `j`.
fn reorder(buf: &mut [u8], nitems: usize, item_bytes: usize, order: &[u8]) {
    let mut tmp = vec![0u8; item_bytes];
    for i in 0..nitems {
        let item = &mut buf[i * item_bytes..(i + 1) * item_bytes];
        tmp.copy_from_slice(item);
        for j in 0..item_bytes {
            item[order[j] as usize - 1] = tmp[j];
        }
    }
}

/// True when a pointer-sized field holds only zero bytes.
pub fn null_pointer(bytes: &[u8]) -> bool {
    bytes.iter().all(|&b| b == 0)
}

/// Convert fixed-point items between byte sizes and orders. Widening
/// sign-extends unless `unsigned`; ones-complement input is rewritten as
/// twos-complement.
pub fn iconvert(
    dst: &mut [u8],
    src: &[u8],
    nitems: usize,
    in_bytes: usize,
    in_order: ByteOrder,
    out_bytes: usize,
    out_order: ByteOrder,
    onescmp: bool,
    unsigned: bool,
) {
    let mut be_in = vec![0u8; in_bytes];
    for i in 0..nitems {
        let item = &src[i * in_bytes..(i + 1) * in_bytes];
        match in_order {
            ByteOrder::Normal => be_in.copy_from_slice(item),
            ByteOrder::Reverse => {
                for (j, b) in item.iter().rev().enumerate() {
                    be_in[j] = *b;
                }
            }
        }

        let out = &mut dst[i * out_bytes..(i + 1) * out_bytes];
        if out_bytes >= in_bytes {
            let fill = if !unsigned && be_in[0] & 0x80 != 0 { 0xff } else { 0x00 };
            let pad = out_bytes - in_bytes;
            out[..pad].fill(fill);
            out[pad..].copy_from_slice(&be_in);
        } else {
            out.copy_from_slice(&be_in[in_bytes - out_bytes..]);
        }

        // ones-complement negatives become twos-complement by adding one
        if onescmp && out[0] > 127 {
            let mut carry = 1u16;
            for b in out.iter_mut().rev() {
                if carry == 0 {
                    break;
                }
                carry += *b as u16;
                *b = (carry & 0xff) as u8;
                carry >>= 8;
            }
        }

        if out_order == ByteOrder::Reverse {
            out.reverse();
        }
    }
}

/// Convert floating point items between two generic bit formats.
///
/// Per item: extract sign and exponent through the input byte permutation,
/// re-bias the exponent (an explicit high mantissa bit shifts the bias by
/// one), saturate on overflow, compensate for explicit/implicit high
/// mantissa bits, and move the mantissa in packets of at most 64 bits.
/// The output is assembled in normal byte order and permuted last.
pub fn fconvert(
    dst: &mut [u8],
    src: &[u8],
    nitems: usize,
    inf: &FloatFormat,
    in_order: &[u8],
    outf: &FloatFormat,
    out_order: &[u8],
    onescmp: bool,
) {
    let in_bytes = inf.byte_len();
    let out_bytes = outf.byte_len();
    let in_bits = in_bytes * 8;
    let out_bits = out_bytes * 8;

    let nbi_exp = inf.expn_bits as usize;
    let nbo_exp = outf.expn_bits as usize;
    let expn_max = mask(nbo_exp) as i64;
    let hexpn = 1i64 << (nbi_exp - 1);

    let hmbi = (inf.guard_bit & 1) as i64;
    let hmbo = (outf.guard_bit & 1) as i64;
    let delta_bias = outf.bias + hmbo - inf.bias - hmbi;

    let in_ord = if is_normal(in_order) { None } else { Some(in_order) };

    dst[..nitems * out_bytes].fill(0);

    for i in 0..nitems {
        let ibase = i * in_bits;
        let obase = i * out_bits;

        let mut expn =
            extract_field(src, ibase + inf.expn_pos as usize, nbi_exp, in_bytes, in_ord) as i64;
        let sign =
            extract_field(src, ibase + inf.sign_pos as usize, 1, in_bytes, in_ord) != 0;

        if onescmp {
            if sign {
                expn = (!expn + 1) & mask(nbi_exp) as i64;
            } else if expn < hexpn {
                expn += 1;
            }
        }
        if expn != 0 {
            expn += delta_bias;
        }

        if expn >= expn_max {
            // overflow: saturate at the largest exponent
            insert_field(expn_max as u64, nbo_exp, dst, obase + outf.expn_pos as usize);
            if sign {
                set_bit(dst, obase + outf.sign_pos as usize);
            }
            continue;
        }
        if expn < 0 {
            // underflow to zero
            continue;
        }

        insert_field(expn as u64, nbo_exp, dst, obase + outf.expn_pos as usize);
        if sign {
            set_bit(dst, obase + outf.sign_pos as usize);
        }

        let mut indxin = ibase + inf.mant_pos as usize;
        let mut inrem = inf.mant_bits as i64;
        let mut indxout = obase + outf.mant_pos as usize;
        let mut outrem = outf.mant_bits as i64;

        let dindx = hmbo - hmbi;
        if dindx > 0 {
            // input high mantissa bit is implicit, output writes it
            set_bit(dst, indxout);
            indxout += dindx as usize;
            outrem -= dindx;
        } else if dindx < 0 && expn != 0 {
            // input writes the high mantissa bit, output assumes it
            indxin += (-dindx) as usize;
            inrem += dindx;
        }

        while inrem > 0 && outrem > 0 {
            let nb = (FIELD_BITS as i64).min(inrem).min(outrem) as usize;
            let mut mant = extract_field(src, indxin, nb, in_bytes, in_ord);
            if onescmp && sign {
                mant = !mant & mask(nb);
            }
            insert_field(mant, nb, dst, indxout);
            indxin += nb;
            indxout += nb;
            inrem -= nb as i64;
            outrem -= nb as i64;
        }
    }

    if hmbo != 0 {
        // an explicit high mantissa bit makes zero look denormalized;
        // items with a zero exponent must be all zero
        for i in 0..nitems {
            let obase = i * out_bits;
            let expn = extract_field(dst, obase + outf.expn_pos as usize, nbo_exp, out_bytes, None);
            if expn == 0 {
                dst[i * out_bytes..(i + 1) * out_bytes].fill(0);
            }
        }
    }

    if !is_normal(out_order) {
        reorder(dst, nitems, out_bytes, out_order);
    }
}

/// Unpack bit-sized items into full-width output items.
pub(crate) fn unpack_bits(
    dst: &mut [u8],
    src: &[u8],
    nitems: usize,
    size_bits: usize,
    bit_offs: usize,
    dout: &Defstr,
) {
    let out_bytes = dout.size;
    for i in 0..nitems {
        let mut fld = extract_field(src, bit_offs + i * size_bits, size_bits, src.len().max(1), None);
        if !dout.unsigned && size_bits < 64 && fld >> (size_bits - 1) & 1 != 0 {
            // sign extend to the full output width
            fld |= !mask(size_bits);
        }
        if out_bytes == 1 && size_bits < 7 {
            // six-bit character codes are printable ASCII less 0x20
            fld = (fld + 0x20) & 0x7f;
        }
        let be = fld.to_be_bytes();
        let out = &mut dst[i * out_bytes..(i + 1) * out_bytes];
        out.copy_from_slice(&be[8 - out_bytes.min(8)..]);
        if dout.order_flag == Some(ByteOrder::Reverse) {
            out.reverse();
        }
    }
}

/// Convert `nitems` of a primitive type between two descriptors, advancing
/// both offsets past the converted bytes.
pub fn convert_primitive(
    dout: &Defstr,
    din: &Defstr,
    nitems: u64,
    src: &[u8],
    soff: &mut usize,
    dst: &mut [u8],
    doff: &mut usize,
) -> PdbResult<()> {
    let n = nitems as usize;

    if din.size_bits > 0 {
        let bits = din.size_bits as usize;
        let in_len = (n * bits + 7) / 8;
        unpack_bits(&mut dst[*doff..], &src[*soff..*soff + in_len], n, bits, 0, dout);
        *soff += in_len;
        *doff += n * dout.size;
        return Ok(());
    }

    let in_len = n * din.size;
    let out_len = n * dout.size;
    if *soff + in_len > src.len() || *doff + out_len > dst.len() {
        return Err(PdbError::Allocation {
            reason: format!("conversion of {} {} items overruns its buffer", n, din.name),
        });
    }
    let s = &src[*soff..*soff + in_len];
    let d = &mut dst[*doff..*doff + out_len];

    match (&din.format, &dout.format) {
        (Some(inf), Some(outf)) => {
            fconvert(d, s, n, inf, &din.order, outf, &dout.order, din.onescmp);
        }
        _ => match (din.order_flag, dout.order_flag) {
            (Some(io), Some(oo)) => {
                iconvert(d, s, n, din.size, io, dout.size, oo, din.onescmp, din.unsigned);
            }
            _ => {
                // orderless data (char and friends): copy what fits
                let nb = din.size.min(dout.size);
                for i in 0..n {
                    let item = &mut d[i * dout.size..(i + 1) * dout.size];
                    item.fill(0);
                    item[..nb].copy_from_slice(&s[i * din.size..i * din.size + nb]);
                }
            }
        },
    }

    *soff += in_len;
    *doff += out_len;
    Ok(())
}

/// Convert `nitems` of a type between two charts, advancing both offsets.
///
/// Derived types convert member by member; the member lists of the two
/// descriptions must agree in length and item counts. Pointer-shaped
/// fields carry no data of their own on disk, so only their nullness
/// survives conversion; the read and write engines fill in real values.
pub fn convert(
    out_chart: &Chart,
    in_chart: &Chart,
    ty_out: &str,
    ty_in: &str,
    nitems: u64,
    src: &[u8],
    soff: &mut usize,
    dst: &mut [u8],
    doff: &mut usize,
) -> PdbResult<()> {
    if is_indirect(ty_in) || is_indirect(ty_out) {
        let dpi = in_chart.size_of("*")?;
        let dpo = out_chart.size_of("*")?;
        for _ in 0..nitems {
            let null = null_pointer(&src[*soff..*soff + dpi]);
            dst[*doff..*doff + dpo].fill(0);
            if !null {
                dst[*doff + dpo - 1] = 1;
            }
            *soff += dpi;
            *doff += dpo;
        }
        return Ok(());
    }

    let din = in_chart.lookup_required(ty_in)?;
    let dout = out_chart.lookup_required(ty_out)?;

    if din.is_primitive() && dout.is_primitive() {
        return convert_primitive(&dout, &din, nitems, src, soff, dst, doff);
    }
    if din.is_primitive() != dout.is_primitive() {
        return Err(PdbError::type_err(format!(
            "cannot convert between primitive and derived types {:?} and {:?}",
            ty_in, ty_out
        )));
    }
    if din.members.len() != dout.members.len() {
        return Err(PdbError::type_err(format!(
            "member lists of {:?} disagree between file and host descriptions",
            ty_in
        )));
    }

    for _ in 0..nitems {
        let sbase = *soff;
        let dbase = *doff;
        for (mi, mo) in din.members.iter().zip(dout.members.iter()) {
            if mi.number != mo.number {
                return Err(PdbError::type_err(format!(
                    "member {:?} of {:?} disagrees in item count between descriptions",
                    mi.name, ty_in
                )));
            }
            *soff = sbase + mi.offset;
            *doff = dbase + mo.offset;
            convert(out_chart, in_chart, &mo.ty, &mi.ty, mi.number, src, soff, dst, doff)?;
        }
        *soff = sbase + din.size;
        *doff = dbase + dout.size;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart::{parse_member, Chart};
    use crate::standard::{Alignment, NumericStandard};

    fn round_trip_f32(v: f32) -> f32 {
        let host = NumericStandard::host();
        let cray = NumericStandard::cray();
        let src = v.to_le_bytes();
        let mut mid = [0u8; 8];
        fconvert(
            &mut mid,
            &src,
            1,
            &host.float_format,
            &host.float_order,
            &cray.float_format,
            &cray.float_order,
            false,
        );
        let mut back = [0u8; 4];
        fconvert(
            &mut back,
            &mid,
            1,
            &cray.float_format,
            &cray.float_order,
            &host.float_format,
            &host.float_order,
            false,
        );
        f32::from_le_bytes(back)
    }

    #[test]
    fn float_survives_cray_round_trip() {
        for v in [0.0f32, 1.0, -1.0, 2.5, -0.0078125, 1.5e-5, 6.02e23] {
            assert_eq!(round_trip_f32(v).to_bits(), v.to_bits(), "value {}", v);
        }
    }

    #[test]
    fn one_converts_to_cray_with_explicit_mantissa_bit() {
        let host = NumericStandard::host();
        let cray = NumericStandard::cray();
        let src = 1.0f32.to_le_bytes();
        let mut out = [0u8; 8];
        fconvert(
            &mut out,
            &src,
            1,
            &host.float_format,
            &host.float_order,
            &cray.float_format,
            &cray.float_order,
            false,
        );
        // 0.1b * 2^1: exponent 0x4001, explicit high mantissa bit set
        assert_eq!(out, [0x40, 0x01, 0x80, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn zero_is_all_zero_bytes_under_explicit_mantissa_bit() {
        let host = NumericStandard::host();
        let cray = NumericStandard::cray();
        let src = 0.0f32.to_le_bytes();
        let mut out = [0xffu8; 8];
        fconvert(
            &mut out,
            &src,
            1,
            &host.float_format,
            &host.float_order,
            &cray.float_format,
            &cray.float_order,
            false,
        );
        assert_eq!(out, [0u8; 8]);
    }

    #[test]
    fn doubles_survive_vax_mid_endian_round_trip() {
        let host = NumericStandard::host();
        let vax = NumericStandard::vax();
        for v in [1.0f64, -3.25, 1234.5678, -9.5e-7] {
            let src = v.to_le_bytes();
            let mut mid = [0u8; 8];
            fconvert(
                &mut mid,
                &src,
                1,
                &host.double_format,
                &host.double_order,
                &vax.double_format,
                &vax.double_order,
                false,
            );
            let mut back = [0u8; 8];
            fconvert(
                &mut back,
                &mid,
                1,
                &vax.double_format,
                &vax.double_order,
                &host.double_format,
                &host.double_order,
                false,
            );
            assert_eq!(f64::from_le_bytes(back).to_bits(), v.to_bits(), "value {}", v);
        }
    }

    #[test]
    fn overflow_saturates_at_maximum_exponent() {
        let host = NumericStandard::host();
        let vax = NumericStandard::vax();
        // f64 exponent far beyond an 8-bit biased exponent
        let src = 1.0e200f64.to_le_bytes();
        let mut out = [0u8; 8];
        fconvert(
            &mut out,
            &src,
            1,
            &host.double_format,
            &host.double_order,
            &vax.double_format,
            &vax.double_order,
            false,
        );
        let expn = extract_field(&out, 1, 8, 8, Some(&vax.double_order));
        assert_eq!(expn, 0xff);
    }

    #[test]
    fn integers_widen_with_sign_and_narrow_back() {
        let vals: [i32; 4] = [1, -1, 123456, -654321];
        let mut src = Vec::new();
        for v in vals {
            src.extend_from_slice(&v.to_le_bytes());
        }
        // 4-byte little-endian to 8-byte big-endian
        let mut wide = vec![0u8; 32];
        iconvert(&mut wide, &src, 4, 4, ByteOrder::Reverse, 8, ByteOrder::Normal, false, false);
        for (i, v) in vals.iter().enumerate() {
            let got = i64::from_be_bytes(wide[i * 8..(i + 1) * 8].try_into().unwrap());
            assert_eq!(got, *v as i64);
        }
        // and back down
        let mut narrow = vec![0u8; 16];
        iconvert(&mut narrow, &wide, 4, 8, ByteOrder::Normal, 4, ByteOrder::Reverse, false, false);
        assert_eq!(narrow, src);
    }

    #[test]
    fn ones_complement_negatives_become_twos_complement() {
        // -5 in 16-bit ones complement, big-endian: !0x0005 = 0xfffa
        let src = [0xff, 0xfa];
        let mut out = [0u8; 2];
        iconvert(&mut out, &src, 1, 2, ByteOrder::Normal, 2, ByteOrder::Normal, true, false);
        assert_eq!(i16::from_be_bytes(out), -5);
    }

    #[test]
    fn field_insert_extract_round_trips_across_byte_seams() {
        let mut buf = [0u8; 8];
        insert_field(0x1a5, 9, &mut buf, 13);
        assert_eq!(extract_field(&buf, 13, 9, 8, None), 0x1a5);
        // neighbors untouched
        assert_eq!(extract_field(&buf, 0, 13, 8, None), 0);
        assert_eq!(extract_field(&buf, 22, 10, 8, None), 0);
    }

    #[test]
    fn extract_field_applies_byte_permutations() {
        // little-endian u32 0x0a0b0c0d: logical big-endian view via [4,3,2,1]
        let src = 0x0a0b0c0du32.to_le_bytes();
        let ord = [4u8, 3, 2, 1];
        assert_eq!(extract_field(&src, 0, 32, 4, Some(&ord)), 0x0a0b0c0d);
        assert_eq!(extract_field(&src, 8, 8, 4, Some(&ord)), 0x0b);
    }

    #[test]
    fn struct_conversion_follows_both_alignments() {
        let host_std = NumericStandard::host();
        let mut host_chart = Chart::seeded(host_std.clone(), Alignment::HOST, &host_std, true);
        let mut file_chart =
            Chart::seeded(NumericStandard::cray(), Alignment::UNICOS, &host_std, false);
        for c in [&mut file_chart, &mut host_chart] {
            c.install_struct(
                "pair",
                vec![parse_member("char tag", 0).unwrap(), parse_member("double v", 0).unwrap()],
            )
            .unwrap();
        }
        let fd = file_chart.lookup("pair").unwrap();
        let hd = host_chart.lookup("pair").unwrap();
        assert_eq!(fd.size, 16);
        assert_eq!(hd.size, 16);

        // host-side item: tag 'x' at 0, 2.5f64 LE at 8
        let mut host_buf = vec![0u8; hd.size];
        host_buf[0] = b'x';
        host_buf[8..16].copy_from_slice(&2.5f64.to_le_bytes());

        let mut file_buf = vec![0u8; fd.size];
        let (mut so, mut do_) = (0usize, 0usize);
        convert(&file_chart, &host_chart, "pair", "pair", 1, &host_buf, &mut so, &mut file_buf, &mut do_)
            .unwrap();

        let mut back = vec![0u8; hd.size];
        let (mut so, mut do_) = (0usize, 0usize);
        convert(&host_chart, &file_chart, "pair", "pair", 1, &file_buf, &mut so, &mut back, &mut do_)
            .unwrap();
        assert_eq!(back, host_buf);
    }

    #[test]
    fn pointer_fields_keep_only_nullness() {
        let host_std = NumericStandard::host();
        let host_chart = Chart::seeded(host_std.clone(), Alignment::HOST, &host_std, true);
        let file_chart =
            Chart::seeded(NumericStandard::intel_a(), Alignment::INTELA, &host_std, false);

        let mut src = vec![0u8; 16];
        src[8] = 0x2a; // second pointer non-null
        let mut dst = vec![0u8; 8];
        let (mut so, mut do_) = (0usize, 0usize);
        convert(&file_chart, &host_chart, "char *", "char *", 2, &src, &mut so, &mut dst, &mut do_)
            .unwrap();
        assert!(null_pointer(&dst[..4]));
        assert!(!null_pointer(&dst[4..8]));
    }
}
