//! Language detection via whatlang.

use tracing::debug;
use whatlang::Lang;

/// Detect the dominant language of a page. `None` for text too short or
/// ambiguous to classify.
pub fn detect(text: &str) -> Option<Lang> {
    let info = whatlang::detect(text)?;
    debug!(
        "Detected language {} (confidence {:.2}, reliable: {})",
        info.lang().code(),
        info.confidence(),
        info.is_reliable()
    );
    Some(info.lang())
}

/// Two-letter code used in `speech.voices_by_language`. Falls back to the
/// three-letter whatlang code for languages without a mapping here.
pub fn iso_639_1(lang: Lang) -> &'static str {
    match lang {
        Lang::Eng => "en",
        Lang::Por => "pt",
        Lang::Spa => "es",
        Lang::Fra => "fr",
        Lang::Deu => "de",
        Lang::Ita => "it",
        Lang::Nld => "nl",
        Lang::Rus => "ru",
        Lang::Pol => "pl",
        Lang::Swe => "sv",
        Lang::Dan => "da",
        Lang::Fin => "fi",
        Lang::Tur => "tr",
        Lang::Ukr => "uk",
        Lang::Ces => "cs",
        Lang::Ell => "el",
        Lang::Jpn => "ja",
        Lang::Cmn => "zh",
        Lang::Kor => "ko",
        Lang::Ara => "ar",
        Lang::Heb => "he",
        Lang::Hin => "hi",
        other => other.code(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_english() {
        let lang = detect(
            "The reader extracts text from every page and speaks each phrase aloud \
             while the next page is being prepared in the background.",
        );
        assert_eq!(lang, Some(Lang::Eng));
    }

    #[test]
    fn detects_portuguese() {
        let lang = detect(
            "O leitor extrai o texto de cada página e fala cada frase em voz alta \
             enquanto a próxima página é preparada em segundo plano.",
        );
        assert_eq!(lang, Some(Lang::Por));
    }

    #[test]
    fn empty_text_is_undetected() {
        assert_eq!(detect(""), None);
    }

    #[test]
    fn maps_to_two_letter_codes() {
        assert_eq!(iso_639_1(Lang::Eng), "en");
        assert_eq!(iso_639_1(Lang::Fra), "fr");
        assert_eq!(iso_639_1(Lang::Epo), "epo");
    }
}
