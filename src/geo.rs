//! Best-effort IP geolocation for the HUD.

use std::time::Duration;

use anyhow::{Context, Result};
use log::{info, warn};
use serde::Deserialize;

pub const UNKNOWN_LOCATION: &str = "GPS: N/A";

const TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Deserialize)]
struct IpLocation {
    lat: Option<f64>,
    lon: Option<f64>,
}

/// Format a geolocation JSON body (`{"lat": .., "lon": ..}`) as a HUD line.
pub fn parse_location(body: &str) -> Option<String> {
    let location: IpLocation = serde_json::from_str(body).ok()?;
    let (lat, lon) = (location.lat?, location.lon?);
    Some(format!("GPS: {:.6}, {:.6}", lat, lon))
}

fn fetch(url: &str) -> Result<String> {
    let client = reqwest::blocking::Client::builder()
        .timeout(TIMEOUT)
        .build()
        .context("building HTTP client")?;
    let response = client
        .get(url)
        .send()
        .and_then(|r| r.error_for_status())
        .with_context(|| format!("requesting {}", url))?;
    response.text().context("reading geolocation response")
}

/// Resolve the HUD location line once. Any failure yields [`UNKNOWN_LOCATION`].
pub fn resolve(url: Option<&str>) -> String {
    let Some(url) = url else {
        return UNKNOWN_LOCATION.to_string();
    };
    match fetch(url).map(|body| parse_location(&body)) {
        Ok(Some(line)) => {
            info!("location resolved: {}", line);
            line
        }
        Ok(None) => {
            warn!("geolocation response from {} has no coordinates", url);
            UNKNOWN_LOCATION.to_string()
        }
        Err(e) => {
            warn!("geolocation unavailable: {:#}", e);
            UNKNOWN_LOCATION.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_location() {
        let body = r#"{"status":"success","country":"Kenya","lat":-1.2833,"lon":36.8167}"#;
        assert_eq!(
            parse_location(body).as_deref(),
            Some("GPS: -1.283300, 36.816700")
        );
    }

    #[test]
    fn test_parse_location_without_coordinates() {
        assert_eq!(parse_location(r#"{"status":"fail","message":"private range"}"#), None);
        assert_eq!(parse_location("<html>rate limited</html>"), None);
    }

    #[test]
    fn test_resolve_disabled() {
        assert_eq!(resolve(None), UNKNOWN_LOCATION);
    }
}
