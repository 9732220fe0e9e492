#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use family_web::errors::{ParseFailure, Result};
use family_web::sources::{JsonRecordParser, RecordParser, StaticRegister, TextSource};
use family_web::types::*;

pub fn person(name: &str, birth: &str) -> Person {
    Person {
        birth_date: Some(birth.to_string()),
        ..Person::new(name)
    }
}

pub fn family(id: &str, couples: Vec<Couple>) -> Family {
    Family {
        couples,
        ..Family::new(id)
    }
}

pub fn couple(husband: Person, wife: Person, married: Option<&str>, children: Vec<Person>) -> Couple {
    Couple {
        husband: Some(husband),
        wife: Some(wife),
        marriage_date: married.map(str::to_string),
        children,
        children_died_infancy: 0,
    }
}

/// HYYPPÄ 6 with father Jaakko (origin "Hyyppä 5"), mother Liisa (no origin
/// reference), married daughter Maria (resulting family "Korpi 9") and an
/// unmarried son.
pub fn hyyppa_6() -> Family {
    let jaakko = Person {
        origin_ref: Some("Hyyppä 5".to_string()),
        ..person("Jaakko", "09.10.1726")
    };
    let liisa = person("Liisa", "02.02.1730");
    let maria = Person {
        result_ref: Some("Korpi 9".to_string()),
        spouse: Some("Matti".to_string()),
        marriage_date: Some("-83".to_string()),
        ..person("Maria", "27.03.1763")
    };
    let juho = person("Juho", "01.01.1765");
    family(
        "HYYPPÄ 6",
        vec![couple(jaakko, liisa, Some("1750"), vec![maria, juho])],
    )
}

/// Jaakko's origin family: he is printed as a child.
pub fn hyyppa_5() -> Family {
    family(
        "HYYPPÄ 5",
        vec![couple(
            person("Antti", "1698"),
            person("Kaisa", "1700"),
            Some("1720"),
            vec![person("Jaakko", "09.10.1726")],
        )],
    )
}

/// Maria's resulting family. Her husband Matti comes from "Korpi 3".
pub fn korpi_9() -> Family {
    let matti = Person {
        origin_ref: Some("Korpi 3".to_string()),
        ..person("Matti", "05.05.1760")
    };
    let maria = Person {
        death_date: Some("14.02.1820".to_string()),
        ..person("Maria", "27.03.1763")
    };
    family(
        "KORPI 9",
        vec![couple(
            matti,
            maria,
            Some("12.11.1783"),
            vec![person("Heikki", "01.09.1785")],
        )],
    )
}

/// Matti's origin family.
pub fn korpi_3() -> Family {
    family(
        "KORPI 3",
        vec![couple(
            person("Erkki", "1730"),
            person("Brita", "1733"),
            Some("1755"),
            vec![person("Matti", "05.05.1760")],
        )],
    )
}

/// The four-family web around HYYPPÄ 6, in printed order.
pub fn register() -> StaticRegister {
    StaticRegister::from_families(&[hyyppa_5(), hyyppa_6(), korpi_3(), korpi_9()])
        .expect("fixture families serialize")
}

/// Text source that counts calls and can change a family's text afterwards.
#[derive(Default)]
pub struct CountingSource {
    register: Mutex<StaticRegister>,
    text_calls: Mutex<HashMap<FamilyId, usize>>,
    list_calls: Mutex<usize>,
    yield_first: bool,
}

impl CountingSource {
    pub fn new(register: StaticRegister) -> Self {
        Self {
            register: Mutex::new(register),
            ..Self::default()
        }
    }

    /// Yields to the scheduler before answering, so concurrent callers
    /// interleave.
    pub fn yielding(register: StaticRegister) -> Self {
        Self {
            yield_first: true,
            ..Self::new(register)
        }
    }

    pub fn replace(&self, family: &Family) {
        self.register.lock().unwrap().insert_family(family).unwrap();
    }

    pub fn text_calls(&self, id: &str) -> usize {
        self.text_calls
            .lock()
            .unwrap()
            .get(&FamilyId::new(id))
            .copied()
            .unwrap_or(0)
    }

    pub fn max_text_calls(&self) -> usize {
        self.text_calls.lock().unwrap().values().copied().max().unwrap_or(0)
    }

    pub fn list_calls(&self) -> usize {
        *self.list_calls.lock().unwrap()
    }
}

#[async_trait]
impl TextSource for CountingSource {
    async fn extract_raw_text(&self, id: &FamilyId) -> Result<Option<String>> {
        if self.yield_first {
            tokio::task::yield_now().await;
        }
        *self.text_calls.lock().unwrap().entry(id.clone()).or_default() += 1;
        let register = self.register.lock().unwrap().clone();
        register.extract_raw_text(id).await
    }

    async fn list_family_ids(&self) -> Result<Vec<FamilyId>> {
        *self.list_calls.lock().unwrap() += 1;
        let register = self.register.lock().unwrap().clone();
        register.list_family_ids().await
    }
}

/// JSON parser that counts calls per family id.
#[derive(Default)]
pub struct CountingParser {
    calls: Mutex<HashMap<FamilyId, usize>>,
}

impl CountingParser {
    pub fn calls(&self, id: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .get(&FamilyId::new(id))
            .copied()
            .unwrap_or(0)
    }

    pub fn max_calls(&self) -> usize {
        self.calls.lock().unwrap().values().copied().max().unwrap_or(0)
    }
}

#[async_trait]
impl RecordParser for CountingParser {
    async fn parse(
        &self,
        id: &FamilyId,
        raw_text: &str,
    ) -> std::result::Result<Family, ParseFailure> {
        *self.calls.lock().unwrap().entry(id.clone()).or_default() += 1;
        JsonRecordParser.parse(id, raw_text).await
    }
}

pub fn source(register: StaticRegister) -> Arc<dyn TextSource> {
    Arc::new(register)
}

pub fn parser() -> Arc<dyn RecordParser> {
    Arc::new(JsonRecordParser)
}
