//! NTLM handshake messages for `DOMAIN\user:pass` proxies.
//!
//! The negotiate message opens the exchange; when the server answers 401
//! with a challenge, `authenticate_header` produces the NTLMv2 response.

use base64::{engine::general_purpose, Engine as _};
use ntlmclient::{Credentials, Flags, Message, NegotiateMessage};
use thiserror::Error;

use crate::session_cache::NtlmCredentials;

#[derive(Error, Debug)]
pub enum NtlmError {
    #[error("Unable to encode NTLM message: {0}")]
    Encode(String),
    #[error("Invalid NTLM challenge: {0}")]
    Challenge(String),
}

/// `Authorization` value that opens the handshake.
pub fn negotiate_header(workstation: &str) -> Result<String, NtlmError> {
    let flags = Flags::NEGOTIATE_UNICODE
        | Flags::REQUEST_TARGET
        | Flags::NEGOTIATE_NTLM
        | Flags::NEGOTIATE_WORKSTATION_SUPPLIED;
    let message = Message::Negotiate(NegotiateMessage {
        flags,
        supplied_domain: String::new(),
        supplied_workstation: workstation.to_string(),
        os_version: Default::default(),
    });
    let bytes = message
        .to_bytes()
        .map_err(|e| NtlmError::Encode(format!("{:?}", e)))?;
    Ok(format!("NTLM {}", general_purpose::STANDARD.encode(bytes)))
}

/// Token from a `WWW-Authenticate: NTLM <token>` header, if any.
pub fn challenge_token(header: &str) -> Option<&str> {
    header
        .split(',')
        .map(str::trim)
        .find_map(|value| value.strip_prefix("NTLM "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// `Authorization` value answering the server challenge in `token`.
pub fn authenticate_header(
    token: &str,
    credentials: &NtlmCredentials,
    workstation: &str,
) -> Result<String, NtlmError> {
    let bytes = general_purpose::STANDARD
        .decode(token)
        .map_err(|e| NtlmError::Challenge(e.to_string()))?;
    let challenge = match Message::try_from(bytes.as_slice()) {
        Ok(Message::Challenge(challenge)) => challenge,
        Ok(_) => return Err(NtlmError::Challenge("not a challenge message".to_string())),
        Err(e) => return Err(NtlmError::Challenge(format!("{:?}", e))),
    };

    let target_info: Vec<u8> = challenge
        .target_information
        .iter()
        .flat_map(|entry| entry.to_bytes())
        .collect();

    let (domain, username) = match credentials.username.split_once('\\') {
        Some((domain, username)) => (domain, username),
        None => ("", credentials.username.as_str()),
    };
    let creds = Credentials {
        username: username.to_string(),
        password: credentials.password.clone(),
        domain: domain.to_string(),
    };

    let response = ntlmclient::respond_challenge_ntlm_v2(
        challenge.challenge,
        &target_info,
        ntlmclient::get_ntlm_time(),
        &creds,
    );
    let message = response.to_message(
        &creds,
        workstation,
        Flags::NEGOTIATE_UNICODE | Flags::NEGOTIATE_NTLM,
    );
    let bytes = message
        .to_bytes()
        .map_err(|e| NtlmError::Encode(format!("{:?}", e)))?;
    Ok(format!("NTLM {}", general_purpose::STANDARD.encode(bytes)))
}

/// Base64 type 2 message as a server would send it, for tests.
#[cfg(test)]
pub(crate) fn sample_challenge() -> String {
    let utf16 = |s: &str| -> Vec<u8> { s.encode_utf16().flat_map(u16::to_le_bytes).collect() };
    let target_name = utf16("DOMAIN");

    let mut target_info = Vec::new();
    // MsvAvNbDomainName, then MsvAvEOL
    target_info.extend_from_slice(&2u16.to_le_bytes());
    target_info.extend_from_slice(&(target_name.len() as u16).to_le_bytes());
    target_info.extend_from_slice(&target_name);
    target_info.extend_from_slice(&[0, 0, 0, 0]);

    let header_len = 56u32;
    let info_offset = header_len + target_name.len() as u32;
    let flags: u32 = 0x0000_0001 | 0x0000_0004 | 0x0000_0200 | 0x0001_0000 | 0x0080_0000 | 0x0200_0000;

    let mut message = Vec::new();
    message.extend_from_slice(b"NTLMSSP\0");
    message.extend_from_slice(&2u32.to_le_bytes());
    message.extend_from_slice(&(target_name.len() as u16).to_le_bytes());
    message.extend_from_slice(&(target_name.len() as u16).to_le_bytes());
    message.extend_from_slice(&header_len.to_le_bytes());
    message.extend_from_slice(&flags.to_le_bytes());
    message.extend_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
    message.extend_from_slice(&[0; 8]);
    message.extend_from_slice(&(target_info.len() as u16).to_le_bytes());
    message.extend_from_slice(&(target_info.len() as u16).to_le_bytes());
    message.extend_from_slice(&info_offset.to_le_bytes());
    message.extend_from_slice(&[6, 1, 0xb1, 0x1d, 0, 0, 0, 15]);
    message.extend_from_slice(&target_name);
    message.extend_from_slice(&target_info);

    general_purpose::STANDARD.encode(message)
}
