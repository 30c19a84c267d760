//! Localized user-facing messages.
//!
//! Every terminal outcome shows the user a message in their own language.
//! Raw upstream errors never leave the process.

use crate::language::Language;

/// Canned reply with helpline contact, used when no resolution strategy
/// produced an acceptable answer.
pub fn default_response(language: Language) -> &'static str {
    match language {
        Language::En => {
            "Sorry, I could not find an answer to your question. Please call the \
             Kisan helpline at 155261 or visit your nearest Common Service Centre."
        }
        Language::Hi => {
            "क्षमा करें, मुझे आपके प्रश्न का उत्तर नहीं मिला। कृपया किसान हेल्पलाइन 155261 पर \
             कॉल करें या अपने निकटतम जन सेवा केंद्र पर जाएँ।"
        }
        Language::Te => {
            "క్షమించండి, మీ ప్రశ్నకు సమాధానం దొరకలేదు. దయచేసి కిసాన్ హెల్ప్‌లైన్ 155261కి \
             కాల్ చేయండి లేదా సమీప సేవా కేంద్రాన్ని సందర్శించండి."
        }
        Language::Ta => {
            "மன்னிக்கவும், உங்கள் கேள்விக்கான பதில் கிடைக்கவில்லை. தயவுசெய்து கிசான் \
             உதவி எண் 155261ஐ அழைக்கவும் அல்லது அருகிலுள்ள சேவை மையத்தைத் தொடர்பு கொள்ளவும்."
        }
    }
}

/// Generic apology for terminal failures the user should not see details of.
pub fn apology(language: Language) -> &'static str {
    match language {
        Language::En => {
            "Sorry, something went wrong while handling your request. \
             Please try again in a little while."
        }
        Language::Hi => {
            "क्षमा करें, आपके अनुरोध को संसाधित करते समय कुछ गड़बड़ हो गई। \
             कृपया थोड़ी देर बाद फिर से प्रयास करें।"
        }
        Language::Te => {
            "క్షమించండి, మీ అభ్యర్థనను ప్రాసెస్ చేయడంలో లోపం జరిగింది. \
             దయచేసి కాసేపటి తర్వాత మళ్లీ ప్రయత్నించండి."
        }
        Language::Ta => {
            "மன்னிக்கவும், உங்கள் கோரிக்கையைச் செயல்படுத்தும்போது பிழை ஏற்பட்டது. \
             சிறிது நேரம் கழித்து மீண்டும் முயற்சிக்கவும்."
        }
    }
}

/// Prompt sent when a voice message could not be transcribed.
pub fn resend_prompt(language: Language) -> &'static str {
    match language {
        Language::En => {
            "Sorry, I could not understand your voice message. \
             Please resend it or type your question instead."
        }
        Language::Hi => {
            "क्षमा करें, मैं आपका वॉयस संदेश समझ नहीं पाया। \
             कृपया उसे दोबारा भेजें या अपना प्रश्न लिखकर भेजें।"
        }
        Language::Te => {
            "క్షమించండి, మీ వాయిస్ సందేశం అర్థం కాలేదు. \
             దయచేసి దాన్ని మళ్లీ పంపండి లేదా మీ ప్రశ్నను టైప్ చేసి పంపండి."
        }
        Language::Ta => {
            "மன்னிக்கவும், உங்கள் குரல் செய்தியைப் புரிந்து கொள்ள முடியவில்லை. \
             அதை மீண்டும் அனுப்பவும் அல்லது உங்கள் கேள்வியைத் தட்டச்சு செய்து அனுப்பவும்."
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_language_has_every_message() {
        for lang in Language::all() {
            assert!(!default_response(lang).is_empty());
            assert!(!apology(lang).is_empty());
            assert!(!resend_prompt(lang).is_empty());
        }
    }

    #[test]
    fn test_default_response_carries_helpline_number() {
        for lang in Language::all() {
            assert!(
                default_response(lang).contains("155261"),
                "{} default response lost the helpline number",
                lang
            );
        }
    }

    #[test]
    fn test_messages_differ_per_language() {
        assert_ne!(default_response(Language::En), default_response(Language::Hi));
        assert_ne!(apology(Language::Te), apology(Language::Ta));
    }
}
