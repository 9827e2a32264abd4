use super::*;
use axum::http::HeaderMap;

const SEALED: &str = "eyJ2IjoxLCJpdiI6IkFBQUFBQUFBQUFBQUFBQUEiLCJ2YWx1ZSI6IkFBQUEiLCJ0YWciOiJBQUFBQUFBQUFBQUFBQUFBQUFBQUFBPT0ifQ==";

#[cfg(test)]
mod extract_bearer_token_tests {
    use super::*;

    fn headers_with(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", value.parse().unwrap());
        headers
    }

    #[test]
    fn valid_bearer_token() {
        let headers = headers_with("Bearer ory_at_Xk2d9PqLm3Vb");

        let result = extract_bearer_token(&headers);
        assert_eq!(result, Ok("ory_at_Xk2d9PqLm3Vb".to_string()));
    }

    #[test]
    fn sealed_token_is_returned_verbatim() {
        let headers = headers_with(&format!("Bearer {}", SEALED));

        let result = extract_bearer_token(&headers);
        assert_eq!(result, Ok(SEALED.to_string()));
    }

    #[test]
    fn valid_bearer_token_with_extra_whitespace() {
        let headers = headers_with("Bearer   ory_at_Xk2d9PqLm3Vb  ");

        let result = extract_bearer_token(&headers);
        assert_eq!(result, Ok("ory_at_Xk2d9PqLm3Vb".to_string()));
    }

    #[test]
    fn case_insensitive_bearer() {
        let headers = headers_with("bearer ory_at_Xk2d9PqLm3Vb");

        let result = extract_bearer_token(&headers);
        assert_eq!(result, Ok("ory_at_Xk2d9PqLm3Vb".to_string()));
    }

    #[test]
    fn missing_authorization_header() {
        let headers = HeaderMap::new();
        let result = extract_bearer_token(&headers);
        assert_eq!(result, Err(TokenError::Missing));
    }

    #[test]
    fn empty_authorization_header() {
        let headers = headers_with("");

        let result = extract_bearer_token(&headers);
        assert_eq!(result, Err(TokenError::InvalidFormat));
    }

    #[test]
    fn missing_bearer_prefix() {
        let headers = headers_with("ory_at_Xk2d9PqLm3Vb");

        let result = extract_bearer_token(&headers);
        assert_eq!(result, Err(TokenError::InvalidFormat));
    }

    #[test]
    fn wrong_auth_scheme() {
        let headers = headers_with("Basic dXNlcjpwYXNz");

        let result = extract_bearer_token(&headers);
        assert_eq!(result, Err(TokenError::InvalidFormat));
    }

    #[test]
    fn bearer_without_token() {
        let headers = headers_with("Bearer");

        let result = extract_bearer_token(&headers);
        assert_eq!(result, Err(TokenError::InvalidFormat));
    }

    #[test]
    fn bearer_with_only_spaces() {
        let headers = headers_with("Bearer    ");

        let result = extract_bearer_token(&headers);
        assert_eq!(result, Err(TokenError::Empty));
    }
}

#[cfg(test)]
mod credential_preview_tests {
    use super::*;

    #[test]
    fn long_credential_is_truncated() {
        assert_eq!(credential_preview(SEALED), "eyJ2IjoxLCJpdiI6IkFB...");
    }

    #[test]
    fn short_credential_is_kept() {
        assert_eq!(credential_preview("short"), "short");
    }
}

#[cfg(test)]
mod token_error_display_tests {
    use super::*;

    #[test]
    fn missing_error_message() {
        let error = TokenError::Missing;
        assert_eq!(error.to_string(), "Authorization token not provided");
    }

    #[test]
    fn invalid_format_error_message() {
        let error = TokenError::InvalidFormat;
        assert_eq!(error.to_string(), "Invalid authorization token format");
    }

    #[test]
    fn empty_error_message() {
        let error = TokenError::Empty;
        assert_eq!(error.to_string(), "Authorization token is empty");
    }
}
