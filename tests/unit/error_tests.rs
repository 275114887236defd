use exec_relay::AppError;

#[test]
fn display_prefixes_category() {
    assert_eq!(
        AppError::NotFound("pipeline 'p1' not found".into()).to_string(),
        "not found: pipeline 'p1' not found"
    );
    assert_eq!(AppError::Config("bad".into()).to_string(), "config: bad");
    assert_eq!(AppError::AtCapacity("full".into()).to_string(), "at capacity: full");
}

#[test]
fn configuration_class_errors_are_pre_stream() {
    for err in [
        AppError::NotFound(String::new()),
        AppError::NotRunnable(String::new()),
        AppError::AmbiguousSink(String::new()),
        AppError::InvalidRequest(String::new()),
        AppError::AtCapacity(String::new()),
        AppError::Config(String::new()),
    ] {
        assert!(err.is_pre_stream(), "{err:?} should be pre-stream");
    }
}

#[test]
fn runtime_errors_are_in_stream() {
    for err in [
        AppError::Timeout(String::new()),
        AppError::NoResponseProduced(String::new()),
        AppError::MalformedContent(String::new()),
        AppError::UnknownContentShape(String::new()),
        AppError::RemoteExecutionFailed(String::new()),
        AppError::Remote(String::new()),
        AppError::Io(String::new()),
        AppError::Internal(String::new()),
    ] {
        assert!(!err.is_pre_stream(), "{err:?} should be in-stream");
    }
}

#[test]
fn user_facing_errors_stream_their_message_verbatim() {
    assert_eq!(AppError::RemoteExecutionFailed("OOM".into()).stream_text(), "OOM");
    assert_eq!(
        AppError::NoResponseProduced(
            "Pipeline cycle finished without response, pipeline ex id run-1".into()
        )
        .stream_text(),
        "Pipeline cycle finished without response, pipeline ex id run-1"
    );
}

#[test]
fn unexpected_errors_get_apology_prefix() {
    let text = AppError::Remote("connection reset".into()).stream_text();
    assert_eq!(
        text,
        "Sorry, there was an error while generating the response\n\nremote: connection reset"
    );
}

#[test]
fn internal_faults_get_apology_prefix() {
    let text = AppError::Internal("watch loop panicked".into()).stream_text();
    assert_eq!(
        text,
        "Sorry, there was an error while generating the response\n\ninternal: watch loop panicked"
    );
}

#[test]
fn timeout_streams_its_message_verbatim() {
    assert_eq!(
        AppError::Timeout("response did not finish in time".into()).stream_text(),
        "response did not finish in time"
    );
}

#[test]
fn toml_errors_convert_to_config() {
    let err: AppError = toml::from_str::<toml::Value>("= broken")
        .map_err(AppError::from)
        .expect_err("invalid toml");
    assert!(matches!(err, AppError::Config(_)));
}
