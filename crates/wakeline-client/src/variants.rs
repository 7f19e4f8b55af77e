//! Per-operation transport variant tables. Order is part of the contract: the dispatcher walks
//! each table top to bottom and the first success wins.

use wakeline_types::{
    BodyEncoding, Channel, FieldCasing, HttpMethod, OperationDescriptor, OperationKind, Route,
    TransportVariant,
};

use BodyEncoding::{Form, Json, PathParam, Query};
use FieldCasing::{Lower, Pascal};
use Route::{Forwarded, Origin};

const LOGIN_PATH: &str = "/auth/login-with-password";
const LOGIN_FALLBACK_PATH: &str = "/auth/login";
const CREATE_ACCOUNT_PATH: &str = "/auth/create-user";
const CHECK_USERNAME_PATH: &str = "/auth/check-username";

const fn post(
    label: &'static str,
    encoding: BodyEncoding,
    casing: FieldCasing,
    route: Route,
    path: &'static str,
) -> TransportVariant {
    TransportVariant {
        label,
        method: HttpMethod::Post,
        encoding,
        casing,
        route,
        channel: Channel::Primary,
        path,
    }
}

const fn get(label: &'static str, encoding: BodyEncoding, path: &'static str) -> TransportVariant {
    TransportVariant {
        label,
        method: HttpMethod::Get,
        encoding,
        casing: FieldCasing::Lower,
        route: Route::Origin,
        channel: Channel::Primary,
        path,
    }
}

const fn alternate(label: &'static str, path: &'static str) -> TransportVariant {
    TransportVariant {
        label,
        method: HttpMethod::Post,
        encoding: BodyEncoding::Json,
        casing: FieldCasing::Pascal,
        route: Route::Origin,
        channel: Channel::Alternate,
        path,
    }
}

static LOGIN_VARIANTS: [TransportVariant; 9] = [
    post("json-pascal", Json, Pascal, Origin, LOGIN_PATH),
    post("json-lower", Json, Lower, Origin, LOGIN_PATH),
    post("forwarded-json-pascal", Json, Pascal, Forwarded, LOGIN_PATH),
    post("forwarded-json-lower", Json, Lower, Forwarded, LOGIN_PATH),
    post("form-pascal", Form, Pascal, Origin, LOGIN_PATH),
    post("form-lower", Form, Lower, Origin, LOGIN_PATH),
    post("json-lower-short-path", Json, Lower, Origin, LOGIN_FALLBACK_PATH),
    post("query-lower", Query, Lower, Origin, LOGIN_PATH),
    alternate("alternate-json-pascal", LOGIN_PATH),
];

static CREATE_ACCOUNT_VARIANTS: [TransportVariant; 7] = [
    post("json-pascal", Json, Pascal, Origin, CREATE_ACCOUNT_PATH),
    post("json-lower", Json, Lower, Origin, CREATE_ACCOUNT_PATH),
    post("forwarded-json-pascal", Json, Pascal, Forwarded, CREATE_ACCOUNT_PATH),
    post("forwarded-json-lower", Json, Lower, Forwarded, CREATE_ACCOUNT_PATH),
    post("form-pascal", Form, Pascal, Origin, CREATE_ACCOUNT_PATH),
    post("form-lower", Form, Lower, Origin, CREATE_ACCOUNT_PATH),
    alternate("alternate-json-pascal", CREATE_ACCOUNT_PATH),
];

static CHECK_USERNAME_VARIANTS: [TransportVariant; 8] = [
    post("json-pascal", Json, Pascal, Origin, CHECK_USERNAME_PATH),
    post("json-lower", Json, Lower, Origin, CHECK_USERNAME_PATH),
    post("form-pascal", Form, Pascal, Origin, CHECK_USERNAME_PATH),
    post("forwarded-json-pascal", Json, Pascal, Forwarded, CHECK_USERNAME_PATH),
    post("forwarded-json-lower", Json, Lower, Forwarded, CHECK_USERNAME_PATH),
    post("json-pascal-path-casing", Json, Pascal, Origin, "/Auth/CheckUsername"),
    get("get-path-param", PathParam, CHECK_USERNAME_PATH),
    get("get-query", Query, CHECK_USERNAME_PATH),
];

pub static LOGIN: OperationDescriptor = OperationDescriptor {
    kind: OperationKind::Login,
    canonical_path: LOGIN_PATH,
    fields: &["email", "password"],
    rejection_markers: &[
        "invalid credentials",
        "invalid email or password",
        "invalid username or password",
        "incorrect password",
        "wrong password",
    ],
    variants: &LOGIN_VARIANTS,
};

pub static CREATE_ACCOUNT: OperationDescriptor = OperationDescriptor {
    kind: OperationKind::CreateAccount,
    canonical_path: CREATE_ACCOUNT_PATH,
    fields: &["username", "password", "email", "country", "age"],
    rejection_markers: &["already exists", "already taken", "already registered", "in use"],
    variants: &CREATE_ACCOUNT_VARIANTS,
};

pub static CHECK_USERNAME: OperationDescriptor = OperationDescriptor {
    kind: OperationKind::CheckUsername,
    canonical_path: CHECK_USERNAME_PATH,
    fields: &["username"],
    rejection_markers: &[],
    variants: &CHECK_USERNAME_VARIANTS,
};

pub fn descriptor(kind: OperationKind) -> &'static OperationDescriptor {
    match kind {
        OperationKind::Login => &LOGIN,
        OperationKind::CreateAccount => &CREATE_ACCOUNT,
        OperationKind::CheckUsername => &CHECK_USERNAME,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_chain_starts_direct_and_ends_on_alternate_channel() {
        let variants = descriptor(OperationKind::Login).variants;
        assert_eq!(variants.len(), 9);
        assert_eq!(variants[0].route, Route::Origin);
        assert_eq!(variants[3].route, Route::Forwarded);
        assert_eq!(variants[3].casing, FieldCasing::Lower);
        assert_eq!(variants[6].path, LOGIN_FALLBACK_PATH);
        let last = variants.last().expect("variants");
        assert_eq!(last.channel, Channel::Alternate);
        assert!(variants[..8].iter().all(|v| v.channel == Channel::Primary));
    }

    #[test]
    fn availability_chain_ends_with_get_variants() {
        let variants = descriptor(OperationKind::CheckUsername).variants;
        assert_eq!(variants[6].method, HttpMethod::Get);
        assert_eq!(variants[6].encoding, BodyEncoding::PathParam);
        assert_eq!(variants[7].encoding, BodyEncoding::Query);
        assert!(descriptor(OperationKind::CheckUsername)
            .rejection_markers
            .is_empty());
    }

    #[test]
    fn labels_are_unique_within_each_table() {
        for kind in [
            OperationKind::Login,
            OperationKind::CreateAccount,
            OperationKind::CheckUsername,
        ] {
            let labels = descriptor(kind)
                .variants
                .iter()
                .map(|v| v.label)
                .collect::<std::collections::HashSet<_>>();
            assert_eq!(labels.len(), descriptor(kind).variants.len(), "{kind}");
        }
    }
}
