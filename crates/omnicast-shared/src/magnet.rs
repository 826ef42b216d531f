//! Magnet-link codec for the unified identity.
//!
//! A magnet link is a single ASCII line carrying both public keys and the
//! Ethereum address, safe to paste through any chat UI:
//!
//! ```text
//! magnet:?xt=urn:identity:v1&secp256k1pub={130hex}&ed25519pub={64hex}&eth={0x40hex}
//! ```
//!
//! Encoding percent-escapes parameter values; decoding is strict about the
//! recognized parameters and tolerant of unknown ones.

use url::form_urlencoded;
use url::Url;

use crate::constants::MAGNET_XT;
use crate::error::MagnetError;
use crate::identity::PublicIdentity;

pub fn encode(identity: &PublicIdentity) -> String {
    let query = form_urlencoded::Serializer::new(String::new())
        .append_pair("xt", MAGNET_XT)
        .append_pair("secp256k1pub", &hex::encode(identity.secp256k1_pub))
        .append_pair("ed25519pub", &hex::encode(identity.ed25519_pub))
        .append_pair("eth", &identity.eth_address())
        .finish();

    format!("magnet:?{query}")
}

pub fn decode(link: &str) -> Result<PublicIdentity, MagnetError> {
    let url = Url::parse(link.trim()).map_err(|_| MagnetError::NotAMagnet)?;
    if url.scheme() != "magnet" {
        return Err(MagnetError::NotAMagnet);
    }

    let mut xt = None;
    let mut secp256k1pub = None;
    let mut ed25519pub = None;
    let mut eth = None;

    // Parameter order may vary; unknown parameters are ignored.
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "xt" => xt = Some(value.into_owned()),
            "secp256k1pub" => secp256k1pub = Some(value.into_owned()),
            "ed25519pub" => ed25519pub = Some(value.into_owned()),
            "eth" => eth = Some(value.into_owned()),
            _ => {}
        }
    }

    let xt = xt.ok_or(MagnetError::MissingParameter("xt"))?;
    if xt != MAGNET_XT {
        return Err(MagnetError::UnsupportedUrn(xt));
    }

    let secp_hex = secp256k1pub.ok_or(MagnetError::MissingParameter("secp256k1pub"))?;
    let ed_hex = ed25519pub.ok_or(MagnetError::MissingParameter("ed25519pub"))?;
    let eth = eth.ok_or(MagnetError::MissingParameter("eth"))?;

    let secp256k1_pub = decode_key::<65>("secp256k1pub", &secp_hex)?;
    if secp256k1_pub[0] != 0x04 {
        // Only the uncompressed SEC1 form is a valid address source.
        return Err(MagnetError::MalformedHex("secp256k1pub"));
    }
    let ed25519_pub = decode_key::<32>("ed25519pub", &ed_hex)?;

    let identity = PublicIdentity {
        secp256k1_pub,
        ed25519_pub,
    };

    if identity.eth_address() != eth {
        return Err(MagnetError::AddressMismatch);
    }

    Ok(identity)
}

fn decode_key<const N: usize>(param: &'static str, value: &str) -> Result<[u8; N], MagnetError> {
    if value.len() != N * 2 {
        return Err(MagnetError::WrongKeyLength {
            param,
            expected: N * 2,
            got: value.len(),
        });
    }
    let bytes = hex::decode(value).map_err(|_| MagnetError::MalformedHex(param))?;
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Identity;

    #[test]
    fn test_encode_decode_round_trip() {
        let public = Identity::generate().public();
        let link = encode(&public);
        assert!(link.starts_with("magnet:?"));
        assert_eq!(decode(&link).unwrap(), public);
    }

    #[test]
    fn test_decode_parameter_order_free() {
        let public = Identity::generate().public();
        let link = format!(
            "magnet:?eth={}&ed25519pub={}&xt=urn%3Aidentity%3Av1&secp256k1pub={}",
            public.eth_address(),
            hex::encode(public.ed25519_pub),
            hex::encode(public.secp256k1_pub),
        );
        assert_eq!(decode(&link).unwrap(), public);
    }

    #[test]
    fn test_decode_tolerates_unknown_parameters() {
        let public = Identity::generate().public();
        let link = format!("{}&dn=alice&tr=udp%3A%2F%2Fexample", encode(&public));
        assert_eq!(decode(&link).unwrap(), public);
    }

    #[test]
    fn test_decode_missing_parameter() {
        let public = Identity::generate().public();
        let link = format!(
            "magnet:?xt=urn%3Aidentity%3Av1&secp256k1pub={}&eth={}",
            hex::encode(public.secp256k1_pub),
            public.eth_address(),
        );
        assert_eq!(
            decode(&link),
            Err(MagnetError::MissingParameter("ed25519pub"))
        );
    }

    #[test]
    fn test_decode_wrong_key_length() {
        let public = Identity::generate().public();
        let link = format!(
            "magnet:?xt=urn%3Aidentity%3Av1&secp256k1pub={}&ed25519pub=abcd&eth={}",
            hex::encode(public.secp256k1_pub),
            public.eth_address(),
        );
        assert!(matches!(
            decode(&link),
            Err(MagnetError::WrongKeyLength {
                param: "ed25519pub",
                ..
            })
        ));
    }

    #[test]
    fn test_decode_malformed_hex() {
        let public = Identity::generate().public();
        let bad_ed = "zz".repeat(32);
        let link = format!(
            "magnet:?xt=urn%3Aidentity%3Av1&secp256k1pub={}&ed25519pub={}&eth={}",
            hex::encode(public.secp256k1_pub),
            bad_ed,
            public.eth_address(),
        );
        assert_eq!(decode(&link), Err(MagnetError::MalformedHex("ed25519pub")));
    }

    #[test]
    fn test_decode_address_mismatch() {
        let a = Identity::generate().public();
        let b = Identity::generate().public();
        let link = format!(
            "magnet:?xt=urn%3Aidentity%3Av1&secp256k1pub={}&ed25519pub={}&eth={}",
            hex::encode(a.secp256k1_pub),
            hex::encode(a.ed25519_pub),
            b.eth_address(),
        );
        assert_eq!(decode(&link), Err(MagnetError::AddressMismatch));
    }

    #[test]
    fn test_decode_rejects_other_schemes() {
        assert_eq!(
            decode("https://example.com/?xt=urn:identity:v1"),
            Err(MagnetError::NotAMagnet)
        );
        assert_eq!(decode("not a link at all"), Err(MagnetError::NotAMagnet));
    }
}
