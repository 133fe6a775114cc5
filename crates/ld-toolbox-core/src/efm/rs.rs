//! GF(256) Reed-Solomon codec: the opaque error-correction primitive used by both CIRC stages.
//!
//! CIRC is defined over `x⁸ + x⁴ + x³ + x² + 1` (0x11d) with the conventional parameters used by
//! the Compact Disc/LaserDisc EFM data path.  Rather than depend on a C++-template-parameterised
//! RS library (as the original implementation does), this module implements a from-scratch
//! Berlekamp-Massey decoder with erasure support, generalised over symbol count and parity count
//! so [`crate::efm::circ::C1Circ`] (32 symbols, 4 parity) and [`crate::efm::circ::C2Circ`] (28
//! symbols, 4 parity) share one implementation.

const PRIMITIVE_POLY: u16 = 0x11d;

/// GF(256) exp/log tables for the `0x11d` field used throughout CIRC.
struct GaloisField {
    exp: [u8; 512],
    log: [u8; 256],
}

impl GaloisField {
    fn new() -> GaloisField {
        let mut exp = [0u8; 512];
        let mut log = [0u8; 256];
        let mut x: u16 = 1;
        for i in 0..255usize {
            exp[i] = x as u8;
            log[x as usize] = i as u8;
            x <<= 1;
            if x & 0x100 != 0 {
                x ^= PRIMITIVE_POLY;
            }
        }
        for i in 255..512 {
            exp[i] = exp[i - 255];
        }
        GaloisField { exp, log }
    }

    fn mul(&self, a: u8, b: u8) -> u8 {
        if a == 0 || b == 0 {
            return 0;
        }
        self.exp[self.log[a as usize] as usize + self.log[b as usize] as usize]
    }

    fn div(&self, a: u8, b: u8) -> u8 {
        assert!(b != 0, "division by zero in GF(256)");
        if a == 0 {
            return 0;
        }
        self.exp[(self.log[a as usize] as usize + 255 - self.log[b as usize] as usize) % 255]
    }

    fn pow(&self, a: u8, power: i32) -> u8 {
        let e = (self.log[a as usize] as i32 * power).rem_euclid(255);
        self.exp[e as usize]
    }

    fn inverse(&self, a: u8) -> u8 {
        self.exp[255 - self.log[a as usize] as usize]
    }

    fn poly_scale(&self, poly: &[u8], scalar: u8) -> Vec<u8> {
        poly.iter().map(|&c| self.mul(c, scalar)).collect()
    }

    fn poly_add(&self, a: &[u8], b: &[u8]) -> Vec<u8> {
        let len = a.len().max(b.len());
        let mut out = vec![0u8; len];
        for (i, &c) in a.iter().enumerate() {
            out[i + len - a.len()] ^= c;
        }
        for (i, &c) in b.iter().enumerate() {
            out[i + len - b.len()] ^= c;
        }
        out
    }

    fn poly_mul(&self, a: &[u8], b: &[u8]) -> Vec<u8> {
        let mut out = vec![0u8; a.len() + b.len() - 1];
        for (i, &ac) in a.iter().enumerate() {
            for (j, &bc) in b.iter().enumerate() {
                out[i + j] ^= self.mul(ac, bc);
            }
        }
        out
    }

    fn poly_eval(&self, poly: &[u8], x: u8) -> u8 {
        let mut y = poly[0];
        for &c in &poly[1..] {
            y = self.mul(y, x) ^ c;
        }
        y
    }
}

/// Outcome of a Reed-Solomon decode attempt.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct RsDecodeResult {
    /// Number of symbols actually corrected (errors + erasures), or `None` if the message was
    /// uncorrectable (too many errors for the parity available, or the corrected message still
    /// fails its syndrome check).
    pub corrected: Option<usize>,
}

/// Decode an RS codeword of `msg.len()` symbols with `nsym` parity symbols (the last `nsym`
/// symbols of `msg`), given a set of known erasure positions (0-based, within `msg`).
///
/// On success, `msg` is corrected in place and `Some(corrected_count)` is returned. On failure
/// (more errors than the code can resolve), `msg` is left unmodified and `None` is returned.
///
/// This mirrors the opaque contract in the original `decode(data, erasures) -> (correctedCount,
/// erasurePositions)`: CIRC's C1/C2 stages are responsible for comparing `corrected_count`
/// against their own erasure-flagging thresholds (§4.G of the design).
pub fn rs_decode(msg: &mut [u8], nsym: usize, erasure_pos: &[usize]) -> Option<usize> {
    let gf = GaloisField::new();
    if erasure_pos.len() > nsym {
        return None;
    }

    let synd = calc_syndromes(&gf, msg, nsym);
    if synd.iter().all(|&s| s == 0) {
        return Some(0);
    }

    let fsynd = forney_syndromes(&gf, &synd, erasure_pos, msg.len());
    let err_loc = find_error_locator(&gf, &fsynd, nsym, erasure_pos.len())?;
    let err_pos = find_errors(&gf, &err_loc, msg.len())?;

    let mut all_pos: Vec<usize> = erasure_pos.to_vec();
    all_pos.extend(err_pos.iter().copied());
    if all_pos.len() > nsym {
        return None;
    }

    correct_errata(&gf, msg, &synd, &all_pos);
    let final_synd = calc_syndromes(&gf, msg, nsym);
    if final_synd.iter().any(|&s| s != 0) {
        return None;
    }
    Some(all_pos.len())
}

fn calc_syndromes(gf: &GaloisField, msg: &[u8], nsym: usize) -> Vec<u8> {
    (0..nsym).map(|i| gf.poly_eval(msg, gf.pow(2, i as i32))).collect()
}

fn forney_syndromes(gf: &GaloisField, synd: &[u8], erasure_pos: &[usize], msg_len: usize) -> Vec<u8> {
    let mut fsynd = synd.to_vec();
    for &pos in erasure_pos {
        let x = gf.pow(2, (msg_len - 1 - pos) as i32);
        for i in 0..fsynd.len() - 1 {
            fsynd[i] = gf.mul(fsynd[i], x) ^ fsynd[i + 1];
        }
        fsynd.pop();
    }
    fsynd
}

fn find_error_locator(
    gf: &GaloisField,
    fsynd: &[u8],
    nsym: usize,
    num_erasures: usize,
) -> Option<Vec<u8>> {
    let mut err_loc: Vec<u8> = vec![1];
    let mut old_loc: Vec<u8> = vec![1];
    let synd_shift = if fsynd.len() > nsym - num_erasures { fsynd.len() - (nsym - num_erasures) } else { 0 };

    for i in 0..(nsym - num_erasures) {
        let k = i + synd_shift;
        let mut delta = fsynd[k];
        for j in 1..err_loc.len() {
            delta ^= gf.mul(err_loc[err_loc.len() - 1 - j], fsynd[k - j]);
        }
        old_loc.push(0);
        if delta != 0 {
            if old_loc.len() > err_loc.len() {
                let new_loc = gf.poly_scale(&old_loc, delta);
                old_loc = gf.poly_scale(&err_loc, gf.inverse(delta));
                err_loc = new_loc;
            }
            err_loc = gf.poly_add(&err_loc, &gf.poly_scale(&old_loc, delta));
        }
    }

    while err_loc.first() == Some(&0) {
        err_loc.remove(0);
    }
    let errs = err_loc.len() - 1;
    if errs * 2 + num_erasures > nsym {
        return None;
    }
    Some(err_loc)
}

fn find_errors(gf: &GaloisField, err_loc: &[u8], msg_len: usize) -> Option<Vec<usize>> {
    let errs = err_loc.len() - 1;
    let mut err_pos = Vec::new();
    for i in 0..msg_len {
        if gf.poly_eval(err_loc, gf.pow(2, i as i32)) == 0 {
            err_pos.push(msg_len - 1 - i);
        }
    }
    if err_pos.len() != errs {
        return None;
    }
    Some(err_pos)
}

fn correct_errata(gf: &GaloisField, msg: &mut [u8], synd: &[u8], pos: &[usize]) {
    let coef_pos: Vec<usize> = pos.iter().map(|&p| msg.len() - 1 - p).collect();
    let err_loc = find_errata_locator(gf, &coef_pos);
    let rev_synd: Vec<u8> = synd.iter().rev().copied().collect();
    let err_eval = find_error_evaluator(gf, &rev_synd, &err_loc, err_loc.len() - 1);
    let err_eval: Vec<u8> = err_eval.into_iter().rev().collect();

    let mut x = Vec::new();
    for &p in &coef_pos {
        x.push(gf.pow(2, (p as i32) - 255));
    }

    for (i, &xi) in x.iter().enumerate() {
        let xi_inv = gf.inverse(xi);
        let mut err_loc_prime = 1u8;
        for (j, &xj) in x.iter().enumerate() {
            if j != i {
                err_loc_prime = gf.mul(err_loc_prime, 1 ^ gf.mul(xj, xi_inv));
            }
        }
        if err_loc_prime == 0 {
            continue;
        }
        let y = gf.poly_eval(&err_eval, xi_inv);
        let y = gf.mul(gf.pow(xi, 1), y);
        let magnitude = gf.div(y, err_loc_prime);
        msg[pos[i]] ^= magnitude;
    }
}

fn find_errata_locator(gf: &GaloisField, coef_pos: &[usize]) -> Vec<u8> {
    let mut e_loc: Vec<u8> = vec![1];
    for &p in coef_pos {
        let term = [gf.pow(2, p as i32), 1];
        e_loc = gf.poly_mul(&e_loc, &term);
    }
    e_loc
}

fn find_error_evaluator(gf: &GaloisField, synd: &[u8], err_loc: &[u8], n: usize) -> Vec<u8> {
    let product = gf.poly_mul(synd, err_loc);
    let start = product.len().saturating_sub(n + 1);
    product[start..].to_vec()
}

/// Append `nsym` Reed-Solomon parity symbols to `data`, returning the full codeword.
///
/// Used only by the composite encoder test oracle (§4.F), which needs to synthesize well-formed
/// subcode so the decoder path can be exercised end to end; the CIRC decoders themselves never
/// encode.
pub fn rs_encode(data: &[u8], nsym: usize) -> Vec<u8> {
    let gf = GaloisField::new();
    let generator = rs_generator_poly(&gf, nsym);
    let mut msg = data.to_vec();
    msg.extend(std::iter::repeat(0u8).take(nsym));
    for i in 0..data.len() {
        let coef = msg[i];
        if coef != 0 {
            for j in 0..generator.len() {
                msg[i + j] ^= gf.mul(generator[j], coef);
            }
        }
    }
    let mut out = data.to_vec();
    out.extend_from_slice(&msg[data.len()..]);
    out
}

fn rs_generator_poly(gf: &GaloisField, nsym: usize) -> Vec<u8> {
    let mut g = vec![1u8];
    for i in 0..nsym {
        g = gf.poly_mul(&g, &[1, gf.pow(2, i as i32)]);
    }
    g
}

#[cfg(test)]
mod tests {
    use googletest::prelude::*;

    use super::*;

    #[googletest::test]
    fn test_encode_decode_no_errors() {
        let data: Vec<u8> = (0..28).collect();
        let codeword = rs_encode(&data, 4);
        let mut msg = codeword.clone();
        let corrected = rs_decode(&mut msg, 4, &[]);
        expect_that!(corrected, some(eq(0)));
        expect_that!(msg, eq(codeword));
    }

    #[googletest::test]
    fn test_decode_corrects_single_symbol_error() {
        let data: Vec<u8> = (0..28).collect();
        let codeword = rs_encode(&data, 4);
        let mut msg = codeword.clone();
        msg[5] ^= 0xFF;
        let corrected = rs_decode(&mut msg, 4, &[]);
        expect_that!(corrected, some(eq(1)));
        expect_that!(msg, eq(codeword));
    }

    #[googletest::test]
    fn test_decode_corrects_two_symbol_errors() {
        let data: Vec<u8> = (0..28).collect();
        let codeword = rs_encode(&data, 4);
        let mut msg = codeword.clone();
        msg[2] ^= 0x11;
        msg[20] ^= 0x22;
        let corrected = rs_decode(&mut msg, 4, &[]);
        expect_that!(corrected, some(eq(2)));
        expect_that!(msg, eq(codeword));
    }

    #[googletest::test]
    fn test_decode_corrects_four_erasures() {
        let data: Vec<u8> = (0..24).collect();
        let codeword = rs_encode(&data, 4);
        let mut msg = codeword.clone();
        msg[0] = 0;
        msg[1] = 0;
        msg[2] = 0;
        msg[3] = 0;
        let corrected = rs_decode(&mut msg, 4, &[0, 1, 2, 3]);
        expect_that!(corrected, some(eq(4)));
        expect_that!(msg, eq(codeword));
    }

    #[googletest::test]
    fn test_decode_fails_with_too_many_errors() {
        let data: Vec<u8> = (0..28).collect();
        let codeword = rs_encode(&data, 4);
        let mut msg = codeword.clone();
        msg[0] ^= 1;
        msg[5] ^= 1;
        msg[10] ^= 1;
        let corrected = rs_decode(&mut msg, 4, &[]);
        expect_that!(corrected, none());
    }
}
