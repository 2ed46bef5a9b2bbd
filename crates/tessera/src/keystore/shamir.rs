// Byte-wise Shamir secret sharing over GF(2^8), field polynomial x^8 + x^4 + x^3 + x + 1.
//
// Every secret byte gets its own random polynomial of degree `threshold - 1`; share `i` holds the
// evaluations at x = i for all bytes, so payloads are exactly as long as the secret.

use super::share::{CustodyLocation, Secret, Share, ShareBatch};
use crate::errors::CustodyError;
use std::collections::HashSet;

const MODULUS: u16 = 0x11b;

// EXP[i] = 3^i. Doubled in length so `mult` never reduces the log sum.
#[expect(
    clippy::cast_possible_truncation,
    clippy::cast_lossless,
    clippy::indexing_slicing,
    reason = "const table construction; every index and value is bounded by the loop"
)]
const EXP_TABLE: [u8; 512] = {
    let mut table = [0_u8; 512];
    let mut val: u16 = 1;
    let mut i = 0;
    while i < 255 {
        table[i] = val as u8;
        table[i + 255] = val as u8;
        val ^= val << 1;
        if val >= 256 {
            val ^= MODULUS;
        }
        i += 1;
    }
    table[510] = table[0];
    table
};

#[expect(
    clippy::cast_possible_truncation,
    clippy::cast_lossless,
    clippy::indexing_slicing,
    reason = "const table construction; every index and value is bounded by the loop"
)]
const LOG_TABLE: [u8; 256] = {
    let mut table = [0_u8; 256];
    let mut i = 0;
    while i < 255 {
        table[EXP_TABLE[i] as usize] = i as u8;
        i += 1;
    }
    table
};

const fn add(a: u8, b: u8) -> u8 {
    a ^ b
}

fn exp(idx: usize) -> u8 {
    EXP_TABLE.get(idx).copied().unwrap_or(0)
}

fn log(a: u8) -> usize {
    usize::from(LOG_TABLE.get(usize::from(a)).copied().unwrap_or(0))
}

fn mult(a: u8, b: u8) -> u8 {
    if a == 0 || b == 0 {
        return 0;
    }
    exp(log(a) + log(b))
}

fn div(a: u8, b: u8) -> Result<u8, CustodyError> {
    if b == 0 {
        // Only reachable with two equal x coordinates, which `combine` rejects up front.
        return Err(CustodyError::MalformedShare(
            "duplicate share index".to_owned(),
        ));
    }
    if a == 0 {
        return Ok(0);
    }
    Ok(exp(log(a) + 255 - log(b)))
}

// Horner evaluation; `coefficients[0]` is the constant term.
fn evaluate(coefficients: &[u8], x: u8) -> u8 {
    coefficients
        .iter()
        .rev()
        .fold(0_u8, |acc, &c| add(mult(acc, x), c))
}

fn interpolate_at_zero(x_samples: &[u8], y_samples: &[u8]) -> Result<u8, CustodyError> {
    let mut result = 0_u8;
    for (i, (&xi, &yi)) in x_samples.iter().zip(y_samples).enumerate() {
        let mut basis = 1_u8;
        for (j, &xj) in x_samples.iter().enumerate() {
            if i == j {
                continue;
            }
            // In characteristic 2, (0 - xj) / (xi - xj) == xj / (xi ^ xj).
            basis = mult(basis, div(xj, add(xi, xj))?);
        }
        result = add(result, mult(yi, basis));
    }
    Ok(result)
}

/// Split `secret` into one share per entry of `custody` (so `n = custody.len()`), any
/// `threshold` of which rebuild it. All shares carry the same fresh batch id and indices `1..=n`.
pub fn split(
    secret: &[u8],
    custody: &[CustodyLocation],
    threshold: usize,
) -> Result<Vec<Share>, CustodyError> {
    let shares = custody.len();
    if secret.is_empty() {
        return Err(CustodyError::InvalidParameters(
            "secret cannot be empty".to_owned(),
        ));
    }
    if !(2..256).contains(&shares) {
        return Err(CustodyError::InvalidParameters(
            "shares must be between 2 and 255".to_owned(),
        ));
    }
    if !(2..=shares).contains(&threshold) {
        return Err(CustodyError::InvalidParameters(format!(
            "threshold must be between 2 and {shares}"
        )));
    }

    let batch = ShareBatch::fresh();
    let mut out = Vec::with_capacity(shares);
    for (x, &location) in (1_u8..=255).zip(custody) {
        out.push(Share {
            index: x,
            payload: vec![0_u8; secret.len()],
            custody: location,
            batch,
        });
    }

    let mut coeffs = zeroize::Zeroizing::new(vec![0_u8; threshold]);
    for (i, &byte) in secret.iter().enumerate() {
        super::crypto::fill_random(&mut coeffs);
        if let Some(constant) = coeffs.first_mut() {
            *constant = byte;
        }
        for share in &mut out {
            let y = evaluate(&coeffs, share.index);
            if let Some(cell) = share.payload.get_mut(i) {
                *cell = y;
            }
        }
    }

    Ok(out)
}

/// Rebuild a secret from at least `threshold` shares of a single split.
///
/// This cannot tell a corrupted share from a good one; a bad payload silently yields a wrong
/// secret, so callers must verify the result against something they already trust.
pub fn combine(shares: &[Share], threshold: usize) -> Result<Secret, CustodyError> {
    if shares.len() < threshold {
        return Err(CustodyError::InsufficientShares {
            needed: threshold,
            supplied: shares.len(),
        });
    }
    let Some(first) = shares.first() else {
        return Err(CustodyError::InsufficientShares {
            needed: threshold.max(2),
            supplied: 0,
        });
    };
    if shares.len() < 2 {
        return Err(CustodyError::InsufficientShares {
            needed: 2,
            supplied: shares.len(),
        });
    }

    let secret_len = first.payload.len();
    if secret_len == 0 {
        return Err(CustodyError::MalformedShare("empty payload".to_owned()));
    }

    let mut seen = HashSet::new();
    let mut x_samples = Vec::with_capacity(shares.len());
    for share in shares {
        if share.batch != first.batch {
            return Err(CustodyError::MalformedShare(
                "shares come from different splits".to_owned(),
            ));
        }
        if share.payload.len() != secret_len {
            return Err(CustodyError::MalformedShare(
                "all shares must have the same length".to_owned(),
            ));
        }
        if share.index == 0 {
            return Err(CustodyError::MalformedShare(
                "share index must be non-zero".to_owned(),
            ));
        }
        if !seen.insert(share.index) {
            return Err(CustodyError::MalformedShare(format!(
                "duplicate share index {}",
                share.index
            )));
        }
        x_samples.push(share.index);
    }

    let mut secret = vec![0_u8; secret_len];
    let mut y_samples = zeroize::Zeroizing::new(vec![0_u8; shares.len()]);
    for (i, out) in secret.iter_mut().enumerate() {
        for (y, share) in y_samples.iter_mut().zip(shares) {
            *y = share.payload.get(i).copied().unwrap_or(0);
        }
        *out = interpolate_at_zero(&x_samples, &y_samples)?;
    }

    Ok(Secret::new(secret))
}
