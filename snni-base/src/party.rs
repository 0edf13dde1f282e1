//! Party roles and the role-dependent local arithmetic applied to additive shares.
//!
//! Parties A and B hold the two additive shares of every secret; party C
//! assists the protocols but holds no additive share of layer outputs.
use crate::constants::PARTIES;
use crate::errors::{Error, Result};
use crate::tensor::{Share, SignedShare};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PartyRole {
    A,
    B,
    C,
}

impl PartyRole {
    pub fn index(&self) -> usize {
        match self {
            PartyRole::A => 0,
            PartyRole::B => 1,
            PartyRole::C => 2,
        }
    }

    pub fn from_index(index: usize) -> Result<Self> {
        match index {
            0 => Ok(PartyRole::A),
            1 => Ok(PartyRole::B),
            2 => Ok(PartyRole::C),
            _ => Err(runtime_error!(
                "Party index {} out of range, there are {} parties",
                index,
                PARTIES
            )),
        }
    }
}

impl fmt::Display for PartyRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PartyRole::A => "A",
            PartyRole::B => "B",
            PartyRole::C => "C",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for PartyRole {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "A" | "0" => Ok(PartyRole::A),
            "B" | "1" => Ok(PartyRole::B),
            "C" | "2" => Ok(PartyRole::C),
            other => Err(runtime_error!("Unknown party role: {}", other)),
        }
    }
}

/// Local arithmetic whose correct form depends on which share a party holds.
///
/// Selected once per process with [`policy_for`].
pub trait PartyArithmeticPolicy: fmt::Debug {
    fn role(&self) -> PartyRole;

    /// Local share of `floor(sum / divisor)`, given this party's share of `sum`.
    ///
    /// The shares produced by A and B add up to the plaintext quotient up to
    /// one unit of rounding error. `divisor` must be positive.
    fn divide_share(&self, local_sum: Share, divisor: u64) -> Share;

    /// Whether this party takes part in truncation rounds.
    fn truncates(&self) -> bool;

    /// Multiplies every element by `2^sf`; identical for every role. `sf` must be below 64.
    fn scale_up(&self, buf: &mut [Share], sf: u32) {
        for x in buf.iter_mut() {
            *x = x.wrapping_shl(sf);
        }
    }
}

fn signed_floor_div(x: SignedShare, divisor: u64) -> SignedShare {
    // Euclidean division rounds towards negative infinity for a positive divisor.
    x.div_euclid(divisor as SignedShare)
}

#[derive(Debug)]
struct FirstShareholder;

impl PartyArithmeticPolicy for FirstShareholder {
    fn role(&self) -> PartyRole {
        PartyRole::A
    }

    fn divide_share(&self, local_sum: Share, divisor: u64) -> Share {
        signed_floor_div(local_sum as SignedShare, divisor) as Share
    }

    fn truncates(&self) -> bool {
        true
    }
}

#[derive(Debug)]
struct SecondShareholder;

impl PartyArithmeticPolicy for SecondShareholder {
    fn role(&self) -> PartyRole {
        PartyRole::B
    }

    // Dividing the negation keeps the rounding direction opposite to A's,
    // which bounds the reconstructed error by one.
    fn divide_share(&self, local_sum: Share, divisor: u64) -> Share {
        let negated = (local_sum as SignedShare).wrapping_neg();
        signed_floor_div(negated, divisor).wrapping_neg() as Share
    }

    fn truncates(&self) -> bool {
        true
    }
}

#[derive(Debug)]
struct Helper;

impl PartyArithmeticPolicy for Helper {
    fn role(&self) -> PartyRole {
        PartyRole::C
    }

    fn divide_share(&self, _local_sum: Share, _divisor: u64) -> Share {
        0
    }

    fn truncates(&self) -> bool {
        false
    }
}

pub fn policy_for(role: PartyRole) -> Box<dyn PartyArithmeticPolicy> {
    match role {
        PartyRole::A => Box::new(FirstShareholder),
        PartyRole::B => Box::new(SecondShareholder),
        PartyRole::C => Box::new(Helper),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};

    fn reconstructed_quotient(s1: i64, s2: i64, k: u64) -> i64 {
        let a = policy_for(PartyRole::A).divide_share(s1 as Share, k);
        let b = policy_for(PartyRole::B).divide_share(s2 as Share, k);
        a.wrapping_add(b) as i64
    }

    fn assert_within_one(s1: i64, s2: i64, k: u64) {
        let exact = (s1 + s2).div_euclid(k as i64);
        let got = reconstructed_quotient(s1, s2, k);
        assert!(
            (got - exact).abs() <= 1,
            "s1={} s2={} k={} got={} exact={}",
            s1,
            s2,
            k,
            got,
            exact
        );
    }

    #[test]
    fn test_role_parsing() {
        || -> Result<()> {
            assert_eq!("a".parse::<PartyRole>()?, PartyRole::A);
            assert_eq!(" B ".parse::<PartyRole>()?, PartyRole::B);
            assert_eq!("2".parse::<PartyRole>()?, PartyRole::C);
            assert!("D".parse::<PartyRole>().is_err());
            for role in [PartyRole::A, PartyRole::B, PartyRole::C] {
                assert_eq!(PartyRole::from_index(role.index())?, role);
                assert_eq!(role.to_string().parse::<PartyRole>()?, role);
            }
            assert!(PartyRole::from_index(3).is_err());
            Ok(())
        }()
        .unwrap();
    }

    #[test]
    fn test_divide_share_signs() {
        for (s1, s2) in [(7, 9), (-7, -9), (13, -4), (-13, 4), (0, 0), (-1, -1), (-2, -2)] {
            for k in [1, 2, 3, 4, 9] {
                assert_within_one(s1, s2, k);
            }
        }
    }

    #[test]
    fn test_divide_share_exact_when_divisible() {
        // Each share divisible by k reconstructs exactly.
        assert_eq!(reconstructed_quotient(8, 12, 4), 5);
        assert_eq!(reconstructed_quotient(-8, -12, 4), -5);
        assert_eq!(reconstructed_quotient(-8, 12, 4), 1);
    }

    #[test]
    fn test_divide_share_random_splits() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(17);
        for _ in 0..10_000 {
            let s = rng.gen_range(-1_000_000i64..1_000_000);
            let s1 = rng.gen_range(-1_000_000i64..1_000_000);
            let k = rng.gen_range(1u64..50);
            assert_within_one(s1, s - s1, k);
        }
    }

    #[test]
    fn test_helper_has_no_share() {
        let helper = policy_for(PartyRole::C);
        assert_eq!(helper.role(), PartyRole::C);
        assert_eq!(helper.divide_share(123, 4), 0);
        assert!(!helper.truncates());
        assert!(policy_for(PartyRole::A).truncates());
        assert!(policy_for(PartyRole::B).truncates());
    }

    #[test]
    fn test_scale_up() {
        let mut buf = vec![1, 3, (-2i64) as Share];
        policy_for(PartyRole::C).scale_up(&mut buf, 4);
        assert_eq!(buf, vec![16, 48, (-32i64) as Share]);
    }
}
