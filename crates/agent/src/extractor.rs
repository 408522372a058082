use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use rebook_core::clock::Clock;
use rebook_core::config::{LlmConfig, LlmProvider};
use rebook_core::domain::booking::{parse_travel_date, BookingId};
use rebook_core::domain::complaint::ComplaintType;
use rebook_core::domain::conversation::{ConversationState, ExtractedFields, Intent};
use rebook_core::domain::trip::TripId;

use crate::llm::{LlmClient, OpenAiCompatibleClient};

#[derive(Debug, Error)]
pub enum ExtractorError {
    #[error("extractor timed out after {0:?}")]
    Timeout(Duration),
    #[error("extractor backend failed: {0}")]
    Backend(String),
    #[error("extractor response carried no JSON object: {0}")]
    MalformedResponse(String),
}

/// Turns one user message into best-effort structured fields.
///
/// `prior` is the thread state before this turn; implementations may use it to keep a
/// multi-turn form (a complaint, a trip search) going when the message is only an answer.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(
        &self,
        text: &str,
        prior: &ConversationState,
    ) -> Result<ExtractedFields, ExtractorError>;
}

pub fn build_extractor(
    config: &LlmConfig,
    clock: Arc<dyn Clock>,
) -> anyhow::Result<Arc<dyn Extractor>> {
    match config.provider {
        LlmProvider::Rules => Ok(Arc::new(RuleBasedExtractor::new(clock))),
        LlmProvider::OpenAi | LlmProvider::Ollama => {
            let client = OpenAiCompatibleClient::from_config(config)?;
            Ok(Arc::new(LlmExtractor::new(
                Arc::new(client),
                clock,
                Duration::from_secs(config.timeout_secs),
            )))
        }
    }
}

const PLACES: &[(&str, &[&str])] = &[
    ("HCM", &["hcm", "tphcm", "ho chi minh", "sai gon", "saigon", "sg"]),
    ("Hanoi", &["hanoi", "ha noi", "hn"]),
    ("Da Lat", &["da lat", "dalat"]),
    ("Nha Trang", &["nha trang", "nhatrang"]),
    ("Vung Tau", &["vung tau", "vungtau"]),
    ("Can Tho", &["can tho", "cantho"]),
];

const FROM_MARKERS: &[&str] = &["from", "tu"];
const TO_MARKERS: &[&str] = &["to", "den", "di", "toi"];

const FAQ_PHRASES: &[&str] = &[
    "policy",
    "policies",
    "how do",
    "how can",
    "how to",
    "luggage",
    "baggage",
    "documents",
    "chinh sach",
    "quy dinh",
    "huong dan",
    "giay to",
    "thu tuc",
    "hanh ly",
    "lam the nao",
    "lam sao",
];

const INTENT_PHRASES: &[(Intent, &[&str])] = &[
    (Intent::CreateComplaint, &["complain", "complaint", "khieu nai", "phan anh"]),
    (
        Intent::CancelBooking,
        &["cancel", "huy ve", "huy booking", "huy chuyen", "khong di nua"],
    ),
    (Intent::GetInvoice, &["invoice", "receipt", "bill", "hoa don"]),
    (
        Intent::ChangeTime,
        &[
            "change",
            "reschedule",
            "move",
            "doi gio",
            "doi ve",
            "doi chuyen",
            "doi ngay",
            "doi lich",
            "doi sang",
        ],
    ),
    (
        Intent::CheckBooking,
        &["check", "status", "lookup", "look up", "kiem tra", "trang thai", "thong tin ve"],
    ),
    (
        Intent::ViewTrips,
        &["trips", "schedule", "timetable", "xem chuyen", "lich trinh", "danh sach chuyen"],
    ),
];

const COMPLAINT_TYPE_PHRASES: &[(ComplaintType, &[&str])] = &[
    (ComplaintType::Service, &["service", "staff", "driver", "dich vu", "nhan vien", "tai xe"]),
    (ComplaintType::Refund, &["refund", "payment", "hoan tien", "thanh toan"]),
    (ComplaintType::Cancellation, &["cancellation", "cancel", "huy"]),
    (ComplaintType::Other, &["other", "khac"]),
];

const MONTHS: &[(&[&str], u32)] = &[
    (&["jan", "january"], 1),
    (&["feb", "february"], 2),
    (&["mar", "march"], 3),
    (&["apr", "april"], 4),
    (&["may"], 5),
    (&["jun", "june"], 6),
    (&["jul", "july"], 7),
    (&["aug", "august"], 8),
    (&["sep", "sept", "september"], 9),
    (&["oct", "october"], 10),
    (&["nov", "november"], 11),
    (&["dec", "december"], 12),
];

const DIACRITIC_FOLDS: &[(&str, char)] = &[
    ("àáạảãâầấậẩẫăằắặẳẵ", 'a'),
    ("èéẹẻẽêềếệểễ", 'e'),
    ("ìíịỉĩ", 'i'),
    ("òóọỏõôồốộổỗơờớợởỡ", 'o'),
    ("ùúụủũưừứựửữ", 'u'),
    ("ỳýỵỷỹ", 'y'),
    ("đ", 'd'),
];

/// Deterministic keyword and pattern extraction. Understands English and unaccented or
/// accented Vietnamese phrasing.
#[derive(Clone)]
pub struct RuleBasedExtractor {
    clock: Arc<dyn Clock>,
}

impl RuleBasedExtractor {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    pub fn extract_fields(&self, text: &str, prior: &ConversationState) -> ExtractedFields {
        let normalized_text = normalize_text(text);
        let tokens = tokenize(&normalized_text);
        let phrase = format!(" {} ", tokens.join(" "));
        let today = self.clock.now().date();

        let booking_id = tokens.iter().find_map(|token| parse_booking_id(token));
        let trip_id = tokens.iter().find_map(|token| parse_trip_id(token));
        let date = extract_date(&tokens, &phrase, today);
        let (route_from, route_to) = extract_route(&tokens);

        let has_ids = booking_id.is_some() || trip_id.is_some();
        let keyword_intent =
            classify_keywords(&phrase, has_ids, route_from.is_some() && route_to.is_some());
        let intent = match complaint_draft(prior) {
            Some(ComplaintDraft::AwaitingBooking) if keyword_intent.is_some() => keyword_intent,
            Some(_) => Some(Intent::CreateComplaint),
            None => keyword_intent.or_else(|| pending_intent(prior)),
        };

        let mut complaint_type = None;
        let mut description = None;
        if intent == Some(Intent::CreateComplaint) {
            if prior.complaint_type.is_none() {
                complaint_type = extract_complaint_type(&phrase);
            }
            description = explicit_description(text).or_else(|| {
                let awaiting = complaint_draft(prior) == Some(ComplaintDraft::AwaitingDescription);
                (awaiting && complaint_type.is_none())
                    .then(|| text.trim().to_string())
                    .filter(|value| !value.is_empty())
            });
        }

        ExtractedFields {
            intent,
            booking_id,
            date,
            trip_id,
            route_from,
            route_to,
            complaint_type,
            description,
        }
    }
}

#[async_trait]
impl Extractor for RuleBasedExtractor {
    async fn extract(
        &self,
        text: &str,
        prior: &ConversationState,
    ) -> Result<ExtractedFields, ExtractorError> {
        Ok(self.extract_fields(text, prior))
    }
}

/// Asks an LLM for a JSON object and keeps only the fields that validate.
pub struct LlmExtractor {
    client: Arc<dyn LlmClient>,
    clock: Arc<dyn Clock>,
    timeout: Duration,
}

impl LlmExtractor {
    pub fn new(client: Arc<dyn LlmClient>, clock: Arc<dyn Clock>, timeout: Duration) -> Self {
        Self { client, clock, timeout }
    }

    fn system_prompt(&self) -> String {
        let today = self.clock.now().date();
        format!(
            "You extract structured fields for a bus ticket support desk. Today is {today}.\n\
             Reply with a single JSON object and nothing else, using exactly these keys:\n\
             intent: one of change_time, check_booking, view_trips, cancel_booking, \
             get_invoice, create_complaint, faq, unknown\n\
             booking_id: VX followed by digits, e.g. VX123456\n\
             date: travel date as YYYY-MM-DD; dd/mm without a year means {year}\n\
             trip_id: T followed by digits, e.g. T001\n\
             route_from, route_to: places such as HCM, Hanoi, Da Lat, Nha Trang, \
             Vung Tau, Can Tho\n\
             complaint_type: one of SERVICE, REFUND, CANCELLATION, OTHER\n\
             description: the complaint text\n\
             Use null for anything the message does not state. Questions about policies, \
             documents or procedures are faq. Requests to move a ticket are change_time.",
            year = today.year()
        )
    }
}

#[async_trait]
impl Extractor for LlmExtractor {
    async fn extract(
        &self,
        text: &str,
        prior: &ConversationState,
    ) -> Result<ExtractedFields, ExtractorError> {
        let system = self.system_prompt();
        let prompt = format!("{}Message: {text}", prior_summary(prior));

        let completion = tokio::time::timeout(self.timeout, self.client.complete(&system, &prompt))
            .await
            .map_err(|_| ExtractorError::Timeout(self.timeout))?
            .map_err(|error| ExtractorError::Backend(error.to_string()))?;

        let fields = parse_llm_fields(&completion)?;
        debug!(
            intent = fields.intent.map(|intent| intent.as_str()).unwrap_or("none"),
            has_booking_id = fields.booking_id.is_some(),
            has_date = fields.date.is_some(),
            "llm extraction parsed"
        );
        Ok(fields)
    }
}

fn prior_summary(prior: &ConversationState) -> String {
    let mut known = Vec::new();
    if let Some(intent) = prior.intent {
        known.push(format!("intent={intent}"));
    }
    if let Some(booking_id) = &prior.booking_id {
        known.push(format!("booking_id={booking_id}"));
    }
    if let Some(date) = prior.date {
        known.push(format!("date={date}"));
    }
    if known.is_empty() {
        String::new()
    } else {
        format!("Already known from earlier turns: {}.\n", known.join(", "))
    }
}

/// Tolerates prose or code fences around the object. Invalid values become absent.
pub fn parse_llm_fields(completion: &str) -> Result<ExtractedFields, ExtractorError> {
    let start = completion.find('{');
    let end = completion.rfind('}');
    let object = match (start, end) {
        (Some(start), Some(end)) if start < end => &completion[start..=end],
        _ => return Err(ExtractorError::MalformedResponse(completion.to_string())),
    };
    let value: Value = serde_json::from_str(object)
        .map_err(|error| ExtractorError::MalformedResponse(error.to_string()))?;

    let text = |key: &str| {
        value
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|raw| !raw.is_empty())
            .map(str::to_string)
    };

    Ok(ExtractedFields {
        intent: text("intent").and_then(|raw| Intent::parse(&raw)),
        booking_id: text("booking_id")
            .and_then(|raw| parse_booking_id(&raw.to_ascii_lowercase())),
        date: text("date").and_then(|raw| parse_travel_date(&raw)),
        trip_id: text("trip_id").and_then(|raw| parse_trip_id(&raw.to_ascii_lowercase())),
        route_from: text("route_from").map(|raw| canonical_place(&raw).unwrap_or(raw)),
        route_to: text("route_to").map(|raw| canonical_place(&raw).unwrap_or(raw)),
        complaint_type: text("complaint_type").and_then(|raw| ComplaintType::parse(&raw)),
        description: text("description"),
    })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ComplaintDraft {
    AwaitingBooking,
    AwaitingType,
    AwaitingDescription,
}

fn complaint_draft(prior: &ConversationState) -> Option<ComplaintDraft> {
    if prior.intent != Some(Intent::CreateComplaint) {
        return None;
    }
    if prior.booking_id.is_none() {
        Some(ComplaintDraft::AwaitingBooking)
    } else if prior.complaint_type.is_none() {
        Some(ComplaintDraft::AwaitingType)
    } else if prior.description.is_none() {
        Some(ComplaintDraft::AwaitingDescription)
    } else {
        None
    }
}

/// The previous turn's intent, while its handler is still waiting for a field.
fn pending_intent(prior: &ConversationState) -> Option<Intent> {
    let intent = prior.intent?;
    let waiting = match intent {
        Intent::CheckBooking | Intent::CancelBooking | Intent::GetInvoice => {
            prior.booking_id.is_none()
        }
        Intent::ViewTrips => {
            prior.route_from.is_none() || prior.route_to.is_none() || prior.date.is_none()
        }
        _ => false,
    };
    waiting.then_some(intent)
}

pub(crate) fn normalize_text(text: &str) -> String {
    text.chars().flat_map(char::to_lowercase).map(fold_diacritic).collect()
}

fn fold_diacritic(character: char) -> char {
    DIACRITIC_FOLDS
        .iter()
        .find(|(accented, _)| accented.contains(character))
        .map(|(_, plain)| *plain)
        .unwrap_or(character)
}

pub(crate) fn tokenize(text: &str) -> Vec<String> {
    let mut sanitized = String::with_capacity(text.len());
    for character in text.chars() {
        if character.is_alphanumeric() || matches!(character, '/' | '-') {
            sanitized.push(character);
        } else {
            sanitized.push(' ');
        }
    }
    sanitized
        .split_whitespace()
        .map(|token| token.trim_matches(|c| c == '-' || c == '/').to_string())
        .filter(|token| !token.is_empty())
        .collect()
}

fn contains_phrase(phrase: &str, needle: &str) -> bool {
    phrase.contains(&format!(" {needle} "))
}

fn parse_booking_id(token: &str) -> Option<BookingId> {
    let digits = token.strip_prefix("vx")?;
    (digits.len() >= 6 && digits.bytes().all(|byte| byte.is_ascii_digit()))
        .then(|| BookingId(format!("VX{digits}")))
}

fn parse_trip_id(token: &str) -> Option<TripId> {
    let digits = token.strip_prefix('t')?;
    (digits.len() >= 3 && digits.bytes().all(|byte| byte.is_ascii_digit()))
        .then(|| TripId(format!("T{digits}")))
}

fn classify_keywords(phrase: &str, has_ids: bool, has_route_pair: bool) -> Option<Intent> {
    if !has_ids && FAQ_PHRASES.iter().any(|needle| contains_phrase(phrase, needle)) {
        return Some(Intent::Faq);
    }
    let keyword = INTENT_PHRASES
        .iter()
        .find(|(_, needles)| needles.iter().any(|needle| contains_phrase(phrase, needle)))
        .map(|(intent, _)| *intent);
    if keyword.is_some() {
        return keyword;
    }
    (has_route_pair && !has_ids).then_some(Intent::ViewTrips)
}

fn extract_complaint_type(phrase: &str) -> Option<ComplaintType> {
    ComplaintType::ALL
        .into_iter()
        .find(|kind| contains_phrase(phrase, &kind.as_str().to_ascii_lowercase()))
        .or_else(|| {
            COMPLAINT_TYPE_PHRASES
                .iter()
                .find(|(_, needles)| needles.iter().any(|needle| contains_phrase(phrase, needle)))
                .map(|(kind, _)| *kind)
        })
}

/// Text after the first `:` that is not part of a clock time.
fn explicit_description(text: &str) -> Option<String> {
    let bytes = text.as_bytes();
    let colon = text.char_indices().find(|(index, character)| {
        *character == ':'
            && !(*index > 0
                && bytes[index - 1].is_ascii_digit()
                && bytes.get(index + 1).is_some_and(u8::is_ascii_digit))
    })?;
    let rest = text[colon.0 + 1..].trim();
    (!rest.is_empty()).then(|| rest.to_string())
}

fn extract_date(tokens: &[String], phrase: &str, today: NaiveDate) -> Option<NaiveDate> {
    let year = today.year();
    if let Some(date) = tokens.iter().find_map(|token| parse_date_token(token, year)) {
        return Some(date);
    }
    if let Some(date) = spoken_date(tokens, year) {
        return Some(date);
    }
    if contains_phrase(phrase, "today") || contains_phrase(phrase, "hom nay") {
        return Some(today);
    }
    if contains_phrase(phrase, "tomorrow") || contains_phrase(phrase, "ngay mai") {
        return today.succ_opt();
    }
    None
}

fn parse_date_token(token: &str, default_year: i32) -> Option<NaiveDate> {
    if let Some(date) = parse_travel_date(token) {
        return Some(date);
    }

    let parts: Vec<&str> = token.split(['/', '-']).collect();
    if !(2..=3).contains(&parts.len())
        || parts.iter().any(|part| part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()))
        || parts[0].len() > 2
        || parts[1].len() > 2
    {
        return None;
    }

    let day = parts[0].parse::<u32>().ok()?;
    let month = parts[1].parse::<u32>().ok()?;
    let year = match parts.get(2) {
        None => default_year,
        Some(raw) if raw.len() == 2 => 2000 + raw.parse::<i32>().ok()?,
        Some(raw) if raw.len() == 4 => raw.parse::<i32>().ok()?,
        Some(_) => return None,
    };
    NaiveDate::from_ymd_opt(year, month, day)
}

/// `6 thang 9 [nam 2025]`, `6 september`, `september 6th`.
fn spoken_date(tokens: &[String], default_year: i32) -> Option<NaiveDate> {
    for (index, token) in tokens.iter().enumerate() {
        let previous = index.checked_sub(1).and_then(|previous| tokens.get(previous));

        if token == "thang" {
            let day = previous.and_then(|raw| parse_day(raw));
            let month = tokens.get(index + 1).and_then(|raw| raw.parse::<u32>().ok());
            let year = match (tokens.get(index + 2), tokens.get(index + 3)) {
                (Some(marker), Some(raw)) if marker == "nam" => raw.parse::<i32>().ok(),
                _ => None,
            };
            if let (Some(day), Some(month)) = (day, month) {
                if let Some(date) =
                    NaiveDate::from_ymd_opt(year.unwrap_or(default_year), month, day)
                {
                    return Some(date);
                }
            }
        }

        if let Some(month) = month_number(token) {
            let day = tokens
                .get(index + 1)
                .and_then(|raw| parse_day(raw))
                .or_else(|| previous.and_then(|raw| parse_day(raw)));
            let date = day.and_then(|day| NaiveDate::from_ymd_opt(default_year, month, day));
            if date.is_some() {
                return date;
            }
        }
    }
    None
}

fn month_number(token: &str) -> Option<u32> {
    MONTHS.iter().find(|(names, _)| names.contains(&token)).map(|(_, number)| *number)
}

fn parse_day(token: &str) -> Option<u32> {
    let digits = ["st", "nd", "rd", "th"]
        .iter()
        .find_map(|suffix| token.strip_suffix(suffix))
        .unwrap_or(token);
    digits.parse::<u32>().ok().filter(|day| (1..=31).contains(day))
}

#[derive(Clone, Copy, Debug)]
struct PlaceMention {
    index: usize,
    canonical: &'static str,
}

fn find_places(tokens: &[String]) -> Vec<PlaceMention> {
    let mut mentions = Vec::new();
    let mut index = 0;
    while index < tokens.len() {
        let matched = PLACES.iter().find_map(|(canonical, aliases)| {
            aliases.iter().find_map(|alias| {
                let words: Vec<&str> = alias.split(' ').collect();
                let window = tokens.get(index..index + words.len())?;
                window
                    .iter()
                    .zip(&words)
                    .all(|(token, word)| token == word)
                    .then_some((*canonical, words.len()))
            })
        });
        match matched {
            Some((canonical, width)) => {
                mentions.push(PlaceMention { index, canonical });
                index += width;
            }
            None => index += 1,
        }
    }
    mentions
}

fn extract_route(tokens: &[String]) -> (Option<String>, Option<String>) {
    let mut route_from = None;
    let mut route_to = None;
    let mut unmarked = Vec::new();

    for mention in find_places(tokens) {
        let marker = mention
            .index
            .checked_sub(1)
            .and_then(|previous| tokens.get(previous))
            .map(String::as_str);
        match marker {
            Some(marker) if FROM_MARKERS.contains(&marker) && route_from.is_none() => {
                route_from = Some(mention.canonical);
            }
            Some(marker) if TO_MARKERS.contains(&marker) && route_to.is_none() => {
                route_to = Some(mention.canonical);
            }
            _ => unmarked.push(mention.canonical),
        }
    }

    for canonical in unmarked {
        if route_from.is_none() {
            route_from = Some(canonical);
        } else if route_to.is_none() && route_from != Some(canonical) {
            route_to = Some(canonical);
        }
    }

    (route_from.map(str::to_string), route_to.map(str::to_string))
}

fn canonical_place(raw: &str) -> Option<String> {
    let tokens = tokenize(&normalize_text(raw));
    match find_places(&tokens).as_slice() {
        [only] => Some(only.canonical.to_string()),
        _ => None,
    }
}
