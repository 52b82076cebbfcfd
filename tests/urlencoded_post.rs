//! Spec §8 scenario 4: a percent-encoded POST body with duplicate keys and non-ASCII
//! (Cyrillic, Japanese) values decodes to four entries with exact code points preserved.

use fastcgi_runtime::http::decode_fields;

#[test]
fn urlencoded_body_decodes_unicode_and_preserves_duplicate_keys() {
    let body = "%268c2LuPm=ccPd%5E92c%24Qd_1ab41hq%5EHDjHp!t!NJBa&\
                 9cIZvi%25-gGtqSQbo=!Llm_0-4Eo-KlIyL&\
                 unicode=%D0%B6%D0%B8%D0%B2%D0%BE%D1%82%D0%BD%D0%BE%D0%B5&\
                 unicode=%E3%82%A4%E3%83%B3%E3%82%BF%E3%83%BC%E3%83%8D%E3%83%83%E3%83%88";

    let fields = decode_fields(body, '&');
    assert_eq!(fields.len(), 4);

    assert_eq!(fields.get("&8c2LuPm"), Some("ccPd^92c$Qd_1ab41hq^HDjHp!t!NJBa"));
    assert_eq!(fields.get("9cIZvi%-gGtqSQbo"), Some("!Llm_0-4Eo-KlIyL"));

    let unicode_values: Vec<&str> = fields.get_all("unicode").collect();
    assert_eq!(unicode_values, vec!["животное", "インターネット"]);
}
