// src/crypto.rs
use crate::config::Config;
use crate::store::StationCredential;
use station_protocol::{Challenge, compute_answer, ct_eq_str};

/// Challenge issuance for the station handshake.
#[derive(Debug, Clone)]
pub struct Crypto {
    challenge_bytes: usize,
}

/// Answer the server expects for one issued challenge. Compared in constant time.
pub struct ExpectedAnswer(String);

impl ExpectedAnswer {
    pub fn matches(&self, candidate: &str) -> bool {
        ct_eq_str(&self.0, candidate)
    }
}

impl Crypto {
    pub fn from_config(cfg: &Config) -> Self {
        Self { challenge_bytes: cfg.challenge_bytes }
    }

    #[inline] pub fn new_challenge(&self) -> Challenge {
        Challenge::with_len(self.challenge_bytes)
    }

    #[inline] pub fn expected_answer(&self, cred: &StationCredential, ch: &Challenge) -> ExpectedAnswer {
        ExpectedAnswer(compute_answer(cred.secret(), &ch.data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expected_answer_matches_station_side_computation() {
        let crypto = Crypto::from_config(&Config::default());
        let cred = StationCredential { id: "S1".into(), key: "k1".into(), active: true };
        let ch = crypto.new_challenge();
        let expected = crypto.expected_answer(&cred, &ch);

        assert!(expected.matches(&ch.answer(b"k1")));
        assert!(!expected.matches(&ch.answer(b"k2")));
        assert!(!expected.matches(""));
    }

    #[test]
    fn challenge_length_follows_config() {
        let cfg = Config { challenge_bytes: 64, ..Config::default() };
        assert_eq!(Crypto::from_config(&cfg).new_challenge().data.len(), 128);
    }
}
