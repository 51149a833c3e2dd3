//! Response parsers.
//!
//! A parser turns a successful [`HttpResponse`] into a typed value. Parsers
//! also know how to rebuild that value from its cached JSON form
//! (`hydrate`), which is how cache hits skip the network.

use crate::network::HttpResponse;
use crate::{Result, SpRestError};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::marker::PhantomData;

#[async_trait]
pub trait ResponseParser: Send + Sync + 'static {
    type Output: Serialize + DeserializeOwned + Send + 'static;

    async fn parse(&self, response: HttpResponse) -> Result<Self::Output>;

    /// Rebuild a value from its cached JSON representation.
    fn hydrate(&self, value: Value) -> Result<Self::Output> {
        serde_json::from_value(value).map_err(|e| SpRestError::Parse {
            message: format!("Cached value could not be restored: {}", e),
        })
    }
}

/// Strip the OData envelope from a JSON payload.
///
/// Verbose responses wrap the payload in `d` (collections in `d.results`);
/// minimal-metadata collections use `value`.
pub fn odata_unwrap(json: Value) -> Value {
    match json {
        Value::Object(mut map) => {
            if let Some(d) = map.remove("d") {
                match d {
                    Value::Object(mut inner) if inner.contains_key("results") => {
                        inner.remove("results").unwrap_or(Value::Null)
                    }
                    other => other,
                }
            } else if let Some(value) = map.remove("value") {
                value
            } else {
                Value::Object(map)
            }
        }
        other => other,
    }
}

/// Default parser for OData JSON endpoints.
pub struct ODataDefaultParser<T = Value> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> ODataDefaultParser<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for ODataDefaultParser<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T> ResponseParser for ODataDefaultParser<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    type Output = T;

    async fn parse(&self, response: HttpResponse) -> Result<T> {
        let response = response.error_for_status()?;
        let json = if response.is_empty() {
            Value::Object(Default::default())
        } else {
            odata_unwrap(response.json::<Value>()?)
        };
        Ok(serde_json::from_value(json)?)
    }
}

/// Parses the body as JSON with no envelope handling. An empty body is `null`.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonParser;

#[async_trait]
impl ResponseParser for JsonParser {
    type Output = Value;

    async fn parse(&self, response: HttpResponse) -> Result<Value> {
        let response = response.error_for_status()?;
        if response.is_empty() {
            return Ok(Value::Null);
        }
        response.json()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TextParser;

#[async_trait]
impl ResponseParser for TextParser {
    type Output = String;

    async fn parse(&self, response: HttpResponse) -> Result<String> {
        response.error_for_status()?.text()
    }
}

/// Raw body bytes.
#[derive(Debug, Default, Clone, Copy)]
pub struct BufferParser;

#[async_trait]
impl ResponseParser for BufferParser {
    type Output = Vec<u8>;

    async fn parse(&self, response: HttpResponse) -> Result<Vec<u8>> {
        Ok(response.error_for_status()?.into_bytes().to_vec())
    }
}
