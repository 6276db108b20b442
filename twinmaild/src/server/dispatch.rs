use crate::server::Node;
use twinmail_proto::{Command, ProtocolError, Request, Response, TextBlock};
use twinmail_storage::MailId;

/// run the request against the node state and produce the wire response
///
/// command failures are logged here and mapped onto the status taxonomy;
/// the caller only ever sees a `Response`.
pub(crate) async fn dispatch(request: Request, node: &Node) -> Response {
    let command = request.command;
    match handle(request, node).await {
        Ok(response) => response,
        Err(error) => {
            if error.is_internal() {
                tracing::error!(reason = %error, command = %command.as_str(), "command failed");
            } else {
                tracing::debug!(reason = %error, command = %command.as_str(), "command rejected");
            }
            error.into()
        }
    }
}

async fn handle(request: Request, node: &Node) -> Result<Response, ProtocolError> {
    match request.command {
        Command::Keys => keys(&request, node).await,
        Command::SetKeys => set_keys(&request, node).await,
        Command::Token => token(&request, node).await,
        Command::Logout => logout(&request, node).await,
        Command::Inbox => inbox(&request, node).await,
        Command::Outbox => outbox(&request, node).await,
        Command::Post => post(&request, node).await,
        Command::Get => get(&request, node).await,
        Command::Delete => delete(&request, node).await,
        Command::Info => Ok(info(node)),
        Command::CallMe => call_me(&request, node).await,
        Command::DeleteMe => delete_me(&request, node).await,
        Command::New => new(&request, node).await,
    }
}

/// the request body as trimmed text, rejecting empty and non-utf8 bodies
fn body_text(request: &Request) -> Result<&str, ProtocolError> {
    let text = std::str::from_utf8(&request.body).map_err(|_| ProtocolError::NotUtf8)?;
    let text = text.trim();
    if text.is_empty() {
        return Err(ProtocolError::EmptyBody);
    }
    Ok(text)
}

fn body_block(request: &Request) -> Result<TextBlock, ProtocolError> {
    Ok(body_text(request)?.parse()?)
}

fn field<'a>(block: &'a TextBlock, name: &'static str) -> Result<&'a str, ProtocolError> {
    block.get(name).ok_or(ProtocolError::MissingField(name))
}

/// resolve the `token` field to a username or fail with 61
async fn authenticate(block: &TextBlock, node: &Node) -> Result<String, ProtocolError> {
    let token = field(block, "token")?;
    node.auth
        .resolve(token)
        .await
        .ok_or(ProtocolError::Unauthorized)
}

async fn keys(request: &Request, node: &Node) -> Result<Response, ProtocolError> {
    let username = body_text(request)?;

    match node.storage.store().user_keys(username).await {
        Some((enc, sign)) => {
            let mut block = TextBlock::new();
            block.set("enc", enc);
            block.set("sign", sign);
            Ok(Response::success(block.to_string()))
        }
        None => Ok(Response::not_found("No keys found")),
    }
}

async fn set_keys(request: &Request, node: &Node) -> Result<Response, ProtocolError> {
    let block = body_block(request)?;
    let username = authenticate(&block, node).await?;

    let keys = block
        .section_as_block("keys")
        .ok_or(ProtocolError::MissingField("keys"))?;
    let enc = field(&keys, "enc")?;
    let sign = field(&keys, "sign")?;

    node.storage
        .store()
        .set_user_keys(&username, enc, sign)
        .await?;
    Ok(Response::empty())
}

async fn token(request: &Request, node: &Node) -> Result<Response, ProtocolError> {
    use crate::auth::Login;

    let block = body_block(request)?;
    let username = field(&block, "username")?;
    let password = field(&block, "password")?;

    match node.auth.login(username, password).await? {
        Login::Token(token) => {
            let mut block = TextBlock::new();
            block.set("token", token);
            Ok(Response::success(block.to_string()))
        }
        Login::UnknownUser => Ok(Response::not_found("no such user found")),
        Login::BadPassword => Err(ProtocolError::Unauthorized),
    }
}

async fn logout(request: &Request, node: &Node) -> Result<Response, ProtocolError> {
    let block = body_block(request)?;
    let token = field(&block, "token")?;

    // revoking an already revoked token still succeeds
    node.auth.revoke(token).await?;
    Ok(Response::empty())
}

async fn inbox(request: &Request, node: &Node) -> Result<Response, ProtocolError> {
    let block = body_block(request)?;
    let username = authenticate(&block, node).await?;

    let ids = node.storage.store().inbox(&username).await;
    let listing = TextBlock::from_items(ids.iter().map(MailId::to_string));
    Ok(Response::success(listing.to_string()))
}

async fn outbox(request: &Request, node: &Node) -> Result<Response, ProtocolError> {
    let block = body_block(request)?;
    let host = field(&block, "host")?;

    let ids = node.storage.store().outbox(host).await;
    let listing = TextBlock::from_items(ids.iter().map(MailId::to_string));
    Ok(Response::success(listing.to_string()))
}

async fn post(request: &Request, node: &Node) -> Result<Response, ProtocolError> {
    let block = body_block(request)?;
    authenticate(&block, node).await?;
    let server = field(&block, "server")?.to_owned();

    let mail = block
        .section_as_block("body")
        .ok_or(ProtocolError::MissingField("body"))?;
    let id = MailId::generate();

    if server == node.config.hostname {
        // mail for our own users never transits the outbox
        let envelope = twinmail_proto::Envelope::from(mail.clone());
        let recipient = envelope
            .local_user()
            .ok_or(ProtocolError::MissingField("recipient"))?
            .to_owned();
        node.storage
            .deliver_local(&recipient, id, mail.to_string().as_bytes())
            .await?;
        tracing::info!(id = %id, recipient = %recipient, "mail delivered locally");
    } else {
        let queued = node
            .storage
            .queue_remote(&server, id, mail.to_string().as_bytes())
            .await?;
        tracing::info!(id = %id, destination = %server, queued, "mail queued");
        if node.federation.hint_due(queued) {
            node.federation.push_hint(server).await;
        }
    }

    Ok(Response::empty())
}

async fn get(request: &Request, node: &Node) -> Result<Response, ProtocolError> {
    let block = body_block(request)?;
    let id: MailId = match field(&block, "id")?.parse() {
        Ok(id) => id,
        // ids never parse to anything that could escape the archive
        // directory, so anything else is simply not a stored mail
        Err(_) => return Ok(Response::not_found("Not found")),
    };

    match node.storage.archive().read(id).await {
        Some(body) => Ok(Response::success(String::from_utf8_lossy(&body))),
        None => Ok(Response::not_found("Not found")),
    }
}

async fn delete(request: &Request, node: &Node) -> Result<Response, ProtocolError> {
    let block = body_block(request)?;
    let username = authenticate(&block, node).await?;
    let id: MailId = match field(&block, "id")?.parse() {
        Ok(id) => id,
        Err(_) => return Ok(Response::not_found("Not found")),
    };

    if !node.storage.store().inbox_remove(&username, id).await? {
        return Ok(Response::not_found("Not found"));
    }
    if !node.storage.archive().remove(id).await {
        return Ok(Response::not_found("Not found"));
    }

    tracing::info!(id = %id, user = %username, "mail deleted");
    Ok(Response::empty())
}

fn info(node: &Node) -> Response {
    let mut block = TextBlock::new();
    let name = if node.config.name.is_empty() {
        "no name"
    } else {
        node.config.name.as_str()
    };
    let description = if node.config.description.is_empty() {
        "no description"
    } else {
        node.config.description.as_str()
    };
    block.set("name", name);
    block.set("desc", description);
    Response::success(block.to_string())
}

async fn call_me(request: &Request, node: &Node) -> Result<Response, ProtocolError> {
    let block = body_block(request)?;
    let host = field(&block, "host")?;

    if node.storage.store().ring_add(host).await? {
        tracing::info!(peer = %host, "peer joined the ring");
    }
    Ok(Response::empty())
}

async fn delete_me(request: &Request, node: &Node) -> Result<Response, ProtocolError> {
    let block = body_block(request)?;
    let host = field(&block, "host")?;

    if node.storage.store().ring_remove(host).await? {
        tracing::info!(peer = %host, "peer left the ring");
    }
    Ok(Response::empty())
}

async fn new(request: &Request, node: &Node) -> Result<Response, ProtocolError> {
    let block = body_block(request)?;
    let host = field(&block, "host")?.to_owned();

    // the sync runs in the engine; the peer gets its acknowledgment now
    node.federation.sync_now(host).await;
    Ok(Response::empty())
}
