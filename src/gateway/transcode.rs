//! Request message assembly.
//!
//! Query parameters and path captures arrive as text. They are laid over the
//! top-level fields of the JSON body and converted to whatever type the
//! message field asks for, so `/items/{id}` fills an `id: u64` and
//! `?tag=a&tag=b` fills a `tags: Vec<String>`.

use std::collections::BTreeMap;

use serde::de::{self, DeserializeOwned, DeserializeSeed, IntoDeserializer, MapAccess, SeqAccess, Visitor};
use serde::forward_to_deserialize_any;
use serde_json::{Map, Value};

/// Text parameters keyed by field name. Repeated keys keep every value.
#[derive(Debug, Default)]
pub(crate) struct Params(BTreeMap<String, Vec<String>>);

impl Params {
    /// Add a value, keeping earlier values for the same key.
    pub(crate) fn append(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.entry(key.into()).or_default().push(value.into());
    }

    /// Set the only value of `key`.
    pub(crate) fn replace(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), vec![value.into()]);
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Decode `T` from `body` with `params` overriding its fields.
pub(crate) fn decode<T: DeserializeOwned>(body: Value, params: Params) -> Result<T, serde_json::Error> {
    if params.is_empty() {
        return serde_json::from_value(body);
    }
    let Value::Object(fields) = body else {
        return Err(de::Error::custom("request body must be a JSON object"));
    };
    T::deserialize(Merged { fields, params })
}

struct Merged {
    fields: Map<String, Value>,
    params: Params,
}

enum Entry {
    Body(Value),
    Param(Vec<String>),
}

impl<'de> de::Deserializer<'de> for Merged {
    type Error = serde_json::Error;

    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        let Merged { fields, params } = self;
        let mut entries: Vec<(String, Entry)> = fields
            .into_iter()
            .filter(|(key, _)| !params.0.contains_key(key))
            .map(|(key, value)| (key, Entry::Body(value)))
            .collect();
        entries.extend(
            params
                .0
                .into_iter()
                .map(|(key, values)| (key, Entry::Param(values))),
        );

        visitor.visit_map(Entries {
            iter: entries.into_iter(),
            value: None,
        })
    }

    forward_to_deserialize_any! {
        bool i8 i16 i32 i64 i128 u8 u16 u32 u64 u128 f32 f64 char str string
        bytes byte_buf option unit unit_struct newtype_struct seq tuple
        tuple_struct map struct enum identifier ignored_any
    }
}

struct Entries {
    iter: std::vec::IntoIter<(String, Entry)>,
    value: Option<Entry>,
}

impl<'de> MapAccess<'de> for Entries {
    type Error = serde_json::Error;

    fn next_key_seed<K: DeserializeSeed<'de>>(&mut self, seed: K) -> Result<Option<K::Value>, Self::Error> {
        match self.iter.next() {
            Some((key, value)) => {
                self.value = Some(value);
                seed.deserialize(key.into_deserializer()).map(Some)
            }
            None => Ok(None),
        }
    }

    fn next_value_seed<V: DeserializeSeed<'de>>(&mut self, seed: V) -> Result<V::Value, Self::Error> {
        match self.value.take() {
            Some(Entry::Body(value)) => seed.deserialize(value),
            Some(Entry::Param(values)) => seed.deserialize(Text(values)),
            None => Err(de::Error::custom("value requested before key")),
        }
    }
}

/// One or more text values for a single field.
struct Text(Vec<String>);

impl Text {
    fn single(self) -> Result<String, serde_json::Error> {
        let mut values = self.0;
        if values.len() == 1 {
            Ok(values.remove(0))
        } else {
            Err(de::Error::custom(format!(
                "expected a single value, got {}",
                values.len()
            )))
        }
    }
}

macro_rules! parse_scalar {
    ($($method:ident => $visit:ident,)*) => {
        $(
            fn $method<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
                let text = self.single()?;
                match text.parse() {
                    Ok(value) => visitor.$visit(value),
                    Err(_) => Err(de::Error::invalid_value(de::Unexpected::Str(&text), &visitor)),
                }
            }
        )*
    };
}

impl<'de> de::Deserializer<'de> for Text {
    type Error = serde_json::Error;

    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        if self.0.len() == 1 {
            visitor.visit_string(self.single()?)
        } else {
            self.deserialize_seq(visitor)
        }
    }

    parse_scalar! {
        deserialize_bool => visit_bool,
        deserialize_i8 => visit_i8,
        deserialize_i16 => visit_i16,
        deserialize_i32 => visit_i32,
        deserialize_i64 => visit_i64,
        deserialize_i128 => visit_i128,
        deserialize_u8 => visit_u8,
        deserialize_u16 => visit_u16,
        deserialize_u32 => visit_u32,
        deserialize_u64 => visit_u64,
        deserialize_u128 => visit_u128,
        deserialize_f32 => visit_f32,
        deserialize_f64 => visit_f64,
    }

    fn deserialize_option<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        visitor.visit_some(self)
    }

    fn deserialize_newtype_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value, Self::Error> {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_seq<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        visitor.visit_seq(TextSeq(self.0.into_iter()))
    }

    fn deserialize_enum<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _variants: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, Self::Error> {
        visitor.visit_enum(self.single()?.into_deserializer())
    }

    forward_to_deserialize_any! {
        char str string bytes byte_buf unit unit_struct tuple tuple_struct
        map struct identifier ignored_any
    }
}

struct TextSeq(std::vec::IntoIter<String>);

impl<'de> SeqAccess<'de> for TextSeq {
    type Error = serde_json::Error;

    fn next_element_seed<T: DeserializeSeed<'de>>(&mut self, seed: T) -> Result<Option<T::Value>, Self::Error> {
        match self.0.next() {
            Some(value) => seed.deserialize(Text(vec![value])).map(Some),
            None => Ok(None),
        }
    }
}
