//! Request-line and Status-line grammar

use nom::{
    bytes::complete::{tag, take_till1, take_while_m_n},
    character::complete::{char, digit1, space1},
    combinator::{all_consuming, map_res, opt, recognize, rest},
    sequence::{preceded, tuple},
    IResult,
};

/// `SIP/2.0`
pub fn sip_version(input: &str) -> IResult<&str, &str> {
    recognize(tuple((tag("SIP/"), digit1, char('.'), digit1)))(input)
}

/// `Method SP Request-URI SP SIP-Version`
pub fn request_line(input: &str) -> IResult<&str, (&str, &str, &str)> {
    let (input, method) = take_till1(|c: char| c == ' ')(input)?;
    let (input, _) = space1(input)?;
    let (input, uri) = take_till1(|c: char| c == ' ')(input)?;
    let (input, _) = space1(input)?;
    let (input, version) = all_consuming(sip_version)(input)?;
    Ok((input, (method, uri, version)))
}

/// `SIP-Version SP Status-Code SP Reason-Phrase`
pub fn status_line(input: &str) -> IResult<&str, (&str, u16, &str)> {
    let (input, version) = sip_version(input)?;
    let (input, _) = space1(input)?;
    let (input, code) = map_res(
        take_while_m_n(3, 3, |c: char| c.is_ascii_digit()),
        |s: &str| s.parse::<u16>(),
    )(input)?;
    let (input, reason) = all_consuming(opt(preceded(char(' '), rest)))(input)?;
    Ok((input, (version, code, reason.unwrap_or(""))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_line() {
        let (_, (method, uri, version)) =
            request_line("INVITE sip:bob@example.com SIP/2.0").unwrap();
        assert_eq!(method, "INVITE");
        assert_eq!(uri, "sip:bob@example.com");
        assert_eq!(version, "SIP/2.0");
        assert!(request_line("INVITE sip:bob@example.com").is_err());
    }

    #[test]
    fn test_status_line() {
        let (_, (_, code, reason)) = status_line("SIP/2.0 180 Ringing").unwrap();
        assert_eq!(code, 180);
        assert_eq!(reason, "Ringing");

        let (_, (_, code, reason)) = status_line("SIP/2.0 408 Request Timeout").unwrap();
        assert_eq!(code, 408);
        assert_eq!(reason, "Request Timeout");

        assert!(status_line("SIP/2.0 20 OK").is_err());
        assert!(status_line("SIP/2.0 2000 OK").is_err());
    }
}
