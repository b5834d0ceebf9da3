use super::*;

fn origin(raw: &str) -> Url {
    Url::parse(raw).unwrap()
}

#[test]
fn dashboard_path_is_encoded_into_query() {
    let url = sign_out_redirect(&origin("https://app.example.com"), "/dashboard").unwrap();
    assert_eq!(url.as_str(), "https://app.example.com/?redirectTo=%2Fdashboard");
}

#[test]
fn redirect_param_round_trips_exact_path() {
    let url = sign_out_redirect(&origin("https://app.example.com"), "/teams/a b?tab=1").unwrap();
    let (key, value) = url.query_pairs().next().unwrap();
    assert_eq!(key, REDIRECT_PARAM);
    assert_eq!(value, "/teams/a b?tab=1");
}

#[test]
fn existing_path_query_and_fragment_are_dropped() {
    let url = sign_out_redirect(&origin("http://localhost:3000/app/home?x=1#top"), "/settings").unwrap();
    assert_eq!(url.path(), "/");
    assert_eq!(url.fragment(), None);
    assert_eq!(url.query(), Some("redirectTo=%2Fsettings"));
    assert_eq!(url.port(), Some(3000));
}

#[test]
fn non_base_origin_is_rejected() {
    let err = sign_out_redirect(&origin("mailto:someone@example.com"), "/").unwrap_err();
    assert!(matches!(err, RedirectError::NotABase(_)));
}
