use std::borrow::Cow;

/// Provider identifier - mostly static constants ("SINA", "BIYING", ...)
pub type ProviderId = Cow<'static, str>;

/// Throttle channel name - one serialized, spaced path to an upstream host
pub type ChannelName = Cow<'static, str>;

/// Failure domain name - one cooldown state machine ("eastmoney", "market_snapshot", ...)
pub type DomainName = Cow<'static, str>;
