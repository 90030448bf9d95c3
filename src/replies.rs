//! Numeric reply helpers.
//!
//! Each helper fills a pooled message with the server as source, the
//! caller's nick (or `*` before one is set) as the first parameter, and
//! queues the rendered line. NAMES and ISUPPORT chunk their payload so
//! every line stays inside the message length and parameter budgets.

use ember_proto::limits::{MAX_MSG_LENGTH, MAX_MSG_PARAMS};
use ember_proto::numeric::{
    ERR_ALREADYREGISTRED, ERR_BADCHANMASK, ERR_INVALIDCAPCMD, ERR_NEEDMOREPARAMS,
    ERR_NICKNAMEINUSE, ERR_NONICKNAMEGIVEN, ERR_NOSUCHCHANNEL, ERR_NOSUCHNICK, ERR_NOTONCHANNEL,
    ERR_NOTREGISTERED, ERR_TOOMANYCHANNELS, ERR_UNKNOWNCOMMAND, RPL_ENDOFNAMES, RPL_ISUPPORT,
    RPL_NAMREPLY, RPL_TOPIC, RPL_USERHOST, RPL_WELCOME,
};
use ember_proto::numeric::{ERR_ERRONEUSNICKNAME, RPL_NOTOPIC};
use ember_proto::{Message, Pooled, MESSAGES};

use crate::channel::Channel;
use crate::connection::Conn;
use crate::util::chunk_join;

pub(crate) const NICK_IN_USE: &str = "This nickname is currently in use";
pub(crate) const NICK_ALREADY_SET: &str = "You already have that nickname";
pub(crate) const USER_IN_USE: &str = "This username is currently in use";
pub(crate) const USER_ALREADY_SET: &str = "You have already registered";

impl Conn {
    /// A pooled message pre-filled with the server as source.
    pub(crate) fn new_reply(&self) -> Pooled<Message> {
        let mut msg = MESSAGES.acquire();
        msg.source = self.server().hostname();
        msg
    }

    /// The user's nick for the reply target slot, `*` before one is set.
    fn reply_nick(&self) -> String {
        let nick = self.user().nick();
        if nick.is_empty() {
            "*".to_owned()
        } else {
            nick
        }
    }

    pub async fn reply_welcome(&self) {
        let mut msg = self.new_reply();
        msg.code = RPL_WELCOME;
        msg.params.push(self.reply_nick());
        msg.trailing = self.server().welcome();
        self.write(msg.render_buffer()).await;
    }

    pub async fn reply_not_implemented(&self, command: &str) {
        let mut msg = self.new_reply();
        msg.code = ERR_UNKNOWNCOMMAND;
        msg.params.push(self.reply_nick());
        msg.params.push(command.to_owned());
        msg.trailing.push_str("That command is not yet implemented");
        self.write(msg.render_buffer()).await;
    }

    pub async fn reply_not_registered(&self) {
        let mut msg = self.new_reply();
        msg.code = ERR_NOTREGISTERED;
        msg.params.push(self.reply_nick());
        msg.trailing.push_str("You must register first");
        self.write(msg.render_buffer()).await;
    }

    pub async fn reply_need_more_params(&self, command: &str) {
        let mut msg = self.new_reply();
        msg.code = ERR_NEEDMOREPARAMS;
        msg.params.push(self.reply_nick());
        if !command.is_empty() {
            msg.params.push(command.to_owned());
        }
        msg.trailing.push_str("Missing parameters");
        self.write(msg.render_buffer()).await;
    }

    pub async fn reply_no_nickname_given(&self) {
        let mut msg = self.new_reply();
        msg.code = ERR_NONICKNAMEGIVEN;
        msg.params.push(self.reply_nick());
        msg.trailing.push_str("No nickname given");
        self.write(msg.render_buffer()).await;
    }

    pub async fn reply_erroneous_nickname(&self, nick: &str) {
        let mut msg = self.new_reply();
        msg.code = ERR_ERRONEUSNICKNAME;
        msg.params.push(self.reply_nick());
        msg.params.push(nick.to_owned());
        msg.trailing.push_str("Erroneous nickname");
        self.write(msg.render_buffer()).await;
    }

    pub async fn reply_nickname_in_use(&self, nick: &str, text: &str) {
        let mut msg = self.new_reply();
        msg.code = ERR_NICKNAMEINUSE;
        msg.params.push(self.reply_nick());
        msg.params.push(nick.to_owned());
        msg.trailing.push_str(text);
        self.write(msg.render_buffer()).await;
    }

    pub async fn reply_already_registered(&self, text: &str) {
        let mut msg = self.new_reply();
        msg.code = ERR_ALREADYREGISTRED;
        msg.params.push(self.reply_nick());
        msg.trailing.push_str(text);
        self.write(msg.render_buffer()).await;
    }

    pub async fn reply_no_such_nick(&self, target: &str) {
        let mut msg = self.new_reply();
        msg.code = ERR_NOSUCHNICK;
        msg.params.push(self.reply_nick());
        msg.params.push(target.to_owned());
        msg.trailing.push_str("Nick not found");
        self.write(msg.render_buffer()).await;
    }

    pub async fn reply_no_such_channel(&self, channel: &str) {
        let mut msg = self.new_reply();
        msg.code = ERR_NOSUCHCHANNEL;
        msg.params.push(self.reply_nick());
        msg.params.push(channel.to_owned());
        msg.trailing.push_str("Channel not found");
        self.write(msg.render_buffer()).await;
    }

    pub async fn reply_bad_chan_mask(&self, channel: &str) {
        let mut msg = self.new_reply();
        msg.code = ERR_BADCHANMASK;
        msg.params.push(self.reply_nick());
        msg.params.push(channel.to_owned());
        msg.trailing.push_str("Bad channel name");
        self.write(msg.render_buffer()).await;
    }

    pub async fn reply_not_on_channel(&self, channel: &str) {
        let mut msg = self.new_reply();
        msg.code = ERR_NOTONCHANNEL;
        msg.params.push(self.reply_nick());
        msg.params.push(channel.to_owned());
        msg.trailing.push_str("You're not on that channel");
        self.write(msg.render_buffer()).await;
    }

    pub async fn reply_too_many_channels(&self, channel: &str) {
        let mut msg = self.new_reply();
        msg.code = ERR_TOOMANYCHANNELS;
        msg.params.push(self.reply_nick());
        msg.params.push(channel.to_owned());
        msg.trailing.push_str("You have joined too many channels");
        self.write(msg.render_buffer()).await;
    }

    pub async fn reply_invalid_cap_command(&self, subcommand: &str) {
        let mut msg = self.new_reply();
        msg.code = ERR_INVALIDCAPCMD;
        msg.params.push(self.reply_nick());
        if !subcommand.is_empty() {
            msg.params.push(subcommand.to_owned());
        }
        msg.trailing.push_str("Invalid CAP command");
        self.write(msg.render_buffer()).await;
    }

    pub async fn reply_no_topic(&self, channel: &Channel) {
        let mut msg = self.new_reply();
        msg.code = RPL_NOTOPIC;
        msg.params.push(self.reply_nick());
        msg.params.push(channel.name());
        msg.trailing.push_str("No topic is set");
        self.write(msg.render_buffer()).await;
    }

    pub async fn reply_channel_topic(&self, channel: &Channel) {
        let mut msg = self.new_reply();
        msg.code = RPL_TOPIC;
        msg.params.push(self.reply_nick());
        msg.params.push(channel.name());
        msg.trailing = channel.topic();
        self.write(msg.render_buffer()).await;
    }

    pub async fn reply_userhost(&self, hosts: &[String]) {
        let mut msg = self.new_reply();
        msg.code = RPL_USERHOST;
        msg.params.push(self.reply_nick());
        msg.trailing = hosts.join(" ");
        self.write(msg.render_buffer()).await;
    }

    /// 353/366 burst for a channel, chunked within the line budget.
    pub async fn reply_channel_names(&self, channel: &Channel) {
        let nicklist = channel.nick_list();
        let nick = self.reply_nick();
        let cname = channel.name();

        let budget = {
            let mut base = self.new_reply();
            base.code = RPL_NAMREPLY;
            base.params = vec![nick.clone(), "=".to_owned(), cname.clone()];
            // Two extra bytes for the " :" that introduces the trailing.
            MAX_MSG_LENGTH.saturating_sub(base.render().len() + 2)
        };

        for line in chunk_join(&nicklist, budget, " ") {
            let mut msg = self.new_reply();
            msg.code = RPL_NAMREPLY;
            msg.params = vec![nick.clone(), "=".to_owned(), cname.clone()];
            msg.trailing = line;
            self.write(msg.render_buffer()).await;
        }

        let mut end = self.new_reply();
        end.code = RPL_ENDOFNAMES;
        end.params = vec![nick, cname];
        end.trailing.push_str("End of NAMES list.");
        self.write(end.render_buffer()).await;
    }

    /// 005 burst, split across lines to honor the parameter and byte
    /// budgets.
    pub async fn reply_isupport(&self) {
        let tokens = self.server().isupport_tokens();
        let nick = self.reply_nick();

        let mut index = 0;
        while index < tokens.len() {
            let mut msg = self.new_reply();
            msg.code = RPL_ISUPPORT;
            msg.params.push(nick.clone());
            msg.trailing.push_str("are supported by this server");

            let mut line_len = msg.render().len();
            while index < tokens.len() && msg.params.len() < MAX_MSG_PARAMS {
                let token = &tokens[index];
                if line_len + token.len() + 1 > MAX_MSG_LENGTH && msg.params.len() > 1 {
                    break;
                }
                line_len += token.len() + 1;
                msg.params.push(token.clone());
                index += 1;
            }

            self.write(msg.render_buffer()).await;
        }
    }
}
